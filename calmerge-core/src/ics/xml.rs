//! RSS/Atom feeds that carry iCalendar payloads inside their items.

use tracing::warn;

use crate::error::{CalMergeError, CalMergeResult};
use crate::ics::parse::{ParsedFeed, parse_calendar};

/// Whether a fetched body looks like XML rather than iCalendar.
pub fn is_xml(body: &str) -> bool {
    body.trim_start_matches('\u{feff}').trim_start().starts_with('<')
}

/// Parse every iCalendar payload embedded in RSS `<item>` or Atom `<entry>` elements.
///
/// The item's link becomes the URL of embedded events that lack one. Items
/// without calendar data are skipped with a warning.
pub fn parse_wrapped_feed(body: &str) -> CalMergeResult<ParsedFeed> {
    let doc = roxmltree::Document::parse(body.trim_start_matches('\u{feff}'))
        .map_err(|e| CalMergeError::IcsParse(format!("Invalid RSS/Atom document: {e}")))?;

    let mut parsed = ParsedFeed::default();

    let items = doc
        .descendants()
        .filter(|n| n.is_element() && matches!(n.tag_name().name(), "item" | "entry"));

    for item in items {
        let link = item_link(&item);

        let payloads: Vec<&str> = item
            .descendants()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .filter(|t| t.contains("BEGIN:VCALENDAR") || t.contains("BEGIN:VEVENT"))
            .collect();

        if payloads.is_empty() {
            warn!(
                "Skipping feed item without calendar data: {}",
                link.as_deref().unwrap_or("(no link)")
            );
            parsed.skipped += 1;
            continue;
        }

        for payload in payloads {
            match parse_calendar(payload) {
                Ok(mut inner) => {
                    for entry in &mut inner.entries {
                        if entry.url.is_none() {
                            entry.url = link.clone();
                        }
                    }
                    parsed.skipped += inner.skipped;
                    parsed.entries.append(&mut inner.entries);
                }
                Err(e) => {
                    warn!("Skipping feed item with invalid calendar data: {e}");
                    parsed.skipped += 1;
                }
            }
        }
    }

    Ok(parsed)
}

/// RSS `<link>text</link>` or Atom `<link href="..."/>`.
fn item_link(item: &roxmltree::Node) -> Option<String> {
    item.children()
        .filter(|n| n.is_element() && n.tag_name().name() == "link")
        .find_map(|n| {
            n.attribute("href")
                .or_else(|| n.text())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}
