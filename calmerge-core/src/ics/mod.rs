//! Feed body parsing.
//!
//! Plain iCalendar documents (RFC 5545) and RSS/Atom feeds wrapping them.

mod parse;
mod xml;

pub use parse::{ParsedFeed, parse_calendar};
pub use xml::{is_xml, parse_wrapped_feed};

use crate::error::CalMergeResult;

/// Parse a fetched feed body, whichever format it is in.
pub fn parse_feed(body: &str) -> CalMergeResult<ParsedFeed> {
    if is_xml(body) {
        parse_wrapped_feed(body)
    } else {
        parse_calendar(body)
    }
}
