/// Days ahead of today that feeds are expanded into.
pub const DEFAULT_WINDOW_DAYS: i64 = 90;

/// Days an event may go unconfirmed before it is dropped.
pub const DEFAULT_GRACE_DAYS: i64 = 1;

pub const DEFAULT_TIMEZONE: &str = "America/New_York";

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

pub const DEFAULT_FETCH_TIMEOUT: &str = "20s";

pub const DEFAULT_LOOKUP_TIMEOUT: &str = "10s";

/// Upper bound on occurrences generated from a single RRULE.
pub const DEFAULT_MAX_OCCURRENCES: u16 = 500;

pub const DEFAULT_GEOCODER_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Environment variable consulted when no geocoder key is configured.
pub const GEOCODER_API_KEY_ENV: &str = "CALMERGE_GEOCODER_API_KEY";

pub const USER_AGENT: &str = concat!("calmerge/", env!("CARGO_PKG_VERSION"));
