//! Local cleanup heuristic used when the primary lookup is unavailable.

const US_STATES: &[(&str, &str)] = &[
    ("Alabama", "AL"),
    ("Alaska", "AK"),
    ("Arizona", "AZ"),
    ("Arkansas", "AR"),
    ("California", "CA"),
    ("Colorado", "CO"),
    ("Connecticut", "CT"),
    ("Delaware", "DE"),
    ("District of Columbia", "DC"),
    ("Florida", "FL"),
    ("Georgia", "GA"),
    ("Hawaii", "HI"),
    ("Idaho", "ID"),
    ("Illinois", "IL"),
    ("Indiana", "IN"),
    ("Iowa", "IA"),
    ("Kansas", "KS"),
    ("Kentucky", "KY"),
    ("Louisiana", "LA"),
    ("Maine", "ME"),
    ("Maryland", "MD"),
    ("Massachusetts", "MA"),
    ("Michigan", "MI"),
    ("Minnesota", "MN"),
    ("Mississippi", "MS"),
    ("Missouri", "MO"),
    ("Montana", "MT"),
    ("Nebraska", "NE"),
    ("Nevada", "NV"),
    ("New Hampshire", "NH"),
    ("New Jersey", "NJ"),
    ("New Mexico", "NM"),
    ("New York", "NY"),
    ("North Carolina", "NC"),
    ("North Dakota", "ND"),
    ("Ohio", "OH"),
    ("Oklahoma", "OK"),
    ("Oregon", "OR"),
    ("Pennsylvania", "PA"),
    ("Rhode Island", "RI"),
    ("South Carolina", "SC"),
    ("South Dakota", "SD"),
    ("Tennessee", "TN"),
    ("Texas", "TX"),
    ("Utah", "UT"),
    ("Vermont", "VT"),
    ("Virginia", "VA"),
    ("Washington", "WA"),
    ("West Virginia", "WV"),
    ("Wisconsin", "WI"),
    ("Wyoming", "WY"),
];

/// State names that are also city names ("New York, NY").
const CITY_STATE_NAMES: &[&str] = &["new york", "washington"];

const COUNTRY_SUFFIXES: &[&str] = &["usa", "us", "united states", "united states of america"];

/// Largest repeated block of segments that gets collapsed ("City, ST").
const MAX_BLOCK: usize = 3;

/// Deterministic cleanup of a comma-separated location.
///
/// Returns `None` when nothing is left.
pub fn fallback_normalize(raw: &str) -> Option<String> {
    let mut segments: Vec<String> = raw
        .split(',')
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect();

    collapse_repeats(&mut segments);
    resolve_state_duplicates(&mut segments);

    while segments
        .last()
        .is_some_and(|s| COUNTRY_SUFFIXES.contains(&s.to_lowercase().as_str()))
        && segments.len() > 1
    {
        segments.pop();
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join(", "))
    }
}

fn same(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

/// Remove adjacent repeats of blocks of up to `MAX_BLOCK` segments.
fn collapse_repeats(segments: &mut Vec<String>) {
    loop {
        let mut changed = false;

        'search: for size in 1..=MAX_BLOCK {
            let mut i = 0;
            while i + 2 * size <= segments.len() {
                if same(&segments[i..i + size], &segments[i + size..i + 2 * size]) {
                    segments.drain(i + size..i + 2 * size);
                    changed = true;
                    break 'search;
                }
                i += 1;
            }
        }

        if !changed {
            break;
        }
    }
}

fn state_abbreviation(segment: &str) -> Option<&'static str> {
    US_STATES
        .iter()
        .find(|(name, abbr)| segment.eq_ignore_ascii_case(name) || segment.eq_ignore_ascii_case(abbr))
        .map(|(_, abbr)| *abbr)
}

/// "VA 22201" -> ("VA", Some("22201")), "Virginia" -> ("VA", None)
fn state_with_zip(segment: &str) -> Option<(&'static str, Option<&str>)> {
    if let Some(abbr) = state_abbreviation(segment) {
        return Some((abbr, None));
    }

    let (head, zip) = segment.rsplit_once(' ')?;
    if !is_zip(zip) {
        return None;
    }
    state_abbreviation(head).map(|abbr| (abbr, Some(zip)))
}

fn is_zip(s: &str) -> bool {
    let (main, plus4) = match s.split_once('-') {
        Some((main, plus4)) => (main, Some(plus4)),
        None => (s, None),
    };
    main.len() == 5
        && main.bytes().all(|b| b.is_ascii_digit())
        && plus4.is_none_or(|p| p.len() == 4 && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Merge adjacent segments naming the same state, keeping the most specific.
///
/// "Virginia, VA" -> "VA", "VA 22201, VA" -> "VA 22201".
fn resolve_state_duplicates(segments: &mut Vec<String>) {
    let mut i = 0;
    while i + 1 < segments.len() {
        match (state_with_zip(&segments[i]), state_with_zip(&segments[i + 1])) {
            (Some((a, zip_a)), Some((b, zip_b)))
                if a == b && !is_city_state_pair(&segments[i], &segments[i + 1]) =>
            {
                let merged = match (zip_a, zip_b) {
                    (Some(_), _) => segments[i].clone(),
                    (None, Some(_)) => segments[i + 1].clone(),
                    (None, None) => a.to_string(),
                };
                segments[i] = merged;
                segments.remove(i + 1);
            }
            _ => i += 1,
        }
    }
}

/// A city named like its state, followed by the state.
fn is_city_state_pair(first: &str, second: &str) -> bool {
    CITY_STATE_NAMES.contains(&first.to_lowercase().as_str())
        && !first.eq_ignore_ascii_case(second)
}
