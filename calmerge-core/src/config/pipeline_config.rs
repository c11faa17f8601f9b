//! Pipeline configuration (calmerge.toml).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::categories::CategoryPrecedence;
use crate::constants::*;
use crate::error::{CalMergeError, CalMergeResult};

fn default_sources_file() -> PathBuf {
    PathBuf::from("sources.toml")
}

fn default_overrides_dir() -> PathBuf {
    PathBuf::from("overrides")
}

fn default_events_dir() -> PathBuf {
    PathBuf::from("events")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/canonical.json")
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_window_days() -> i64 {
    DEFAULT_WINDOW_DAYS
}

fn default_grace_days() -> i64 {
    DEFAULT_GRACE_DAYS
}

fn default_max_concurrent_fetches() -> usize {
    DEFAULT_MAX_CONCURRENT_FETCHES
}

fn default_fetch_timeout() -> String {
    DEFAULT_FETCH_TIMEOUT.to_string()
}

fn default_max_occurrences() -> u16 {
    DEFAULT_MAX_OCCURRENCES
}

/// Top-level configuration for one pipeline deployment.
///
/// Relative paths are resolved against `base_dir`, which is the directory
/// holding the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_sources_file")]
    pub sources_file: PathBuf,

    #[serde(default = "default_overrides_dir")]
    pub overrides_dir: PathBuf,

    #[serde(default = "default_events_dir")]
    pub events_dir: PathBuf,

    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Extra copy of the sorted collection for renderers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    /// Reference timezone all instance times are converted into.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_window_days")]
    pub window_days: i64,

    #[serde(default = "default_grace_days")]
    pub grace_days: i64,

    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Per-feed request timeout, e.g. "20s".
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: String,

    #[serde(default = "default_max_occurrences")]
    pub max_occurrences: u16,

    #[serde(default)]
    pub category_precedence: CategoryPrecedence,

    #[serde(default)]
    pub geocoder: GeocoderConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_geocoder_url() -> String {
    DEFAULT_GEOCODER_URL.to_string()
}

fn default_lookup_timeout() -> String {
    DEFAULT_LOOKUP_TIMEOUT.to_string()
}

fn default_address_cache_path() -> PathBuf {
    PathBuf::from("data/address_cache.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    #[serde(default = "default_geocoder_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_lookup_timeout")]
    pub timeout: String,

    #[serde(default = "default_address_cache_path")]
    pub cache_path: PathBuf,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        GeocoderConfig {
            base_url: default_geocoder_url(),
            api_key: None,
            timeout: default_lookup_timeout(),
            cache_path: default_address_cache_path(),
        }
    }
}

impl GeocoderConfig {
    /// Configured key, else the `CALMERGE_GEOCODER_API_KEY` environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(GEOCODER_API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> CalMergeResult<Duration> {
        parse_duration("geocoder.timeout", &self.timeout)
    }
}

fn default_category_cache_path() -> PathBuf {
    PathBuf::from("data/category_cache.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_category_cache_path")]
    pub cache_path: PathBuf,

    /// Tag -> keywords matched against title and description.
    #[serde(default)]
    pub taxonomy: BTreeMap<String, Vec<String>>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            cache_path: default_category_cache_path(),
            taxonomy: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Search order: explicit path, ./calmerge.toml, <config dir>/calmerge/config.toml
    pub fn locate(explicit: Option<&Path>) -> CalMergeResult<PathBuf> {
        if let Some(path) = explicit {
            return Ok(expand(path));
        }

        let local = PathBuf::from("calmerge.toml");
        if local.exists() {
            return Ok(local);
        }

        let config_dir = dirs::config_dir()
            .ok_or_else(|| CalMergeError::Config("Could not determine config directory".into()))?;
        Ok(config_dir.join("calmerge").join("config.toml"))
    }

    /// Load config from a TOML file, with `CALMERGE__*` environment overrides.
    pub fn load(path: &Path) -> CalMergeResult<Self> {
        if !path.exists() {
            return Err(CalMergeError::Config(format!(
                "Config file not found at {}",
                path.display()
            )));
        }

        let mut config: PipelineConfig = Config::builder()
            .add_source(File::from(path.to_path_buf()))
            .add_source(Environment::with_prefix("CALMERGE").separator("__"))
            .build()
            .map_err(|e| CalMergeError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CalMergeError::Config(e.to_string()))?;

        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;

        Ok(config)
    }

    /// A config rooted at `base_dir` with every default applied.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        PipelineConfig {
            sources_file: default_sources_file(),
            overrides_dir: default_overrides_dir(),
            events_dir: default_events_dir(),
            store_path: default_store_path(),
            output_path: None,
            timezone: default_timezone(),
            window_days: default_window_days(),
            grace_days: default_grace_days(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fetch_timeout: default_fetch_timeout(),
            max_occurrences: default_max_occurrences(),
            category_precedence: CategoryPrecedence::default(),
            geocoder: GeocoderConfig::default(),
            classifier: ClassifierConfig::default(),
            base_dir: base_dir.into(),
        }
    }

    pub fn validate(&self) -> CalMergeResult<()> {
        self.tz()?;
        self.fetch_timeout()?;
        self.geocoder.timeout()?;

        if self.window_days <= 0 {
            return Err(CalMergeError::Config(format!(
                "window_days must be positive, got {}",
                self.window_days
            )));
        }
        if self.grace_days < 0 {
            return Err(CalMergeError::Config(format!(
                "grace_days must not be negative, got {}",
                self.grace_days
            )));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(CalMergeError::Config(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn tz(&self) -> CalMergeResult<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| CalMergeError::Config(format!("Unknown timezone '{}'", self.timezone)))
    }

    pub fn fetch_timeout(&self) -> CalMergeResult<Duration> {
        parse_duration("fetch_timeout", &self.fetch_timeout)
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        let path = expand(path);
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn sources_path(&self) -> PathBuf {
        self.resolve(&self.sources_file)
    }

    pub fn overrides_path(&self) -> PathBuf {
        self.resolve(&self.overrides_dir)
    }

    pub fn events_path(&self) -> PathBuf {
        self.resolve(&self.events_dir)
    }

    pub fn store_file(&self) -> PathBuf {
        self.resolve(&self.store_path)
    }

    pub fn output_file(&self) -> Option<PathBuf> {
        self.output_path.as_deref().map(|p| self.resolve(p))
    }

    pub fn address_cache_file(&self) -> PathBuf {
        self.resolve(&self.geocoder.cache_path)
    }

    pub fn category_cache_file(&self) -> PathBuf {
        self.resolve(&self.classifier.cache_path)
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn parse_duration(field: &str, value: &str) -> CalMergeResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| CalMergeError::Config(format!("Invalid {field} '{value}': {e}")))
}
