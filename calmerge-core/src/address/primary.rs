//! Primary address lookup.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::instrument;

use crate::config::GeocoderConfig;
use crate::constants::USER_AGENT;
use crate::error::{CalMergeError, CalMergeResult};

/// Network lookup that turns a raw location into a concise label.
pub trait AddressLookup: Send + Sync {
    fn lookup(&self, raw: &str) -> impl Future<Output = CalMergeResult<String>> + Send;
}

impl<T: AddressLookup> AddressLookup for &T {
    fn lookup(&self, raw: &str) -> impl Future<Output = CalMergeResult<String>> + Send {
        (**self).lookup(raw)
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    formatted_address: String,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    short_name: String,
    #[serde(default)]
    types: Vec<String>,
}

impl GeocodeResult {
    fn component(&self, kind: &str) -> Option<&AddressComponent> {
        self.address_components
            .iter()
            .find(|c| c.types.iter().any(|t| t == kind))
    }

    /// "<number> <route>, <locality>, <ST>", else "<locality>, <ST>", else the
    /// formatted address without its country and ZIP.
    fn concise_label(&self) -> Option<String> {
        let locality = self
            .component("locality")
            .or_else(|| self.component("postal_town"))
            .or_else(|| self.component("sublocality"))
            .map(|c| c.long_name.as_str());
        let state = self
            .component("administrative_area_level_1")
            .map(|c| c.short_name.as_str());
        let route = self.component("route").map(|c| c.long_name.as_str());
        let number = self.component("street_number").map(|c| c.long_name.as_str());

        match (number, route, locality, state) {
            (Some(number), Some(route), Some(locality), Some(state)) => {
                return Some(format!("{number} {route}, {locality}, {state}"));
            }
            (_, _, Some(locality), Some(state)) => return Some(format!("{locality}, {state}")),
            _ => {}
        }

        self.trimmed_formatted_address()
    }

    fn trimmed_formatted_address(&self) -> Option<String> {
        let country = self.component("country");
        let mut segments: Vec<&str> = self
            .formatted_address
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if segments.len() > 1
            && segments.last().is_some_and(|last| {
                country.is_some_and(|c| {
                    last.eq_ignore_ascii_case(&c.long_name) || last.eq_ignore_ascii_case(&c.short_name)
                }) || last.eq_ignore_ascii_case("USA")
            })
        {
            segments.pop();
        }

        let mut label = segments.join(", ");
        if let Some(zip) = self.component("postal_code") {
            if let Some(stripped) = label.strip_suffix(zip.long_name.as_str()) {
                label = stripped.trim_end().to_string();
            }
        }

        (!label.is_empty()).then_some(label)
    }
}

/// Google-Geocoding-compatible HTTP client.
pub struct GeocodeClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl GeocodeClient {
    pub fn new(config: &GeocoderConfig) -> CalMergeResult<Self> {
        let timeout = config.timeout()?;
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(GeocodeClient {
            client,
            base_url: config.base_url.clone(),
            api_key: config.resolved_api_key(),
            timeout,
        })
    }

    #[cfg(test)]
    pub fn new_with_base_url(base_url: &str, api_key: Option<&str>) -> Self {
        GeocodeClient {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.map(String::from),
            timeout: Duration::from_secs(2),
        }
    }
}

impl AddressLookup for GeocodeClient {
    #[instrument(skip(self), level = "debug")]
    async fn lookup(&self, raw: &str) -> CalMergeResult<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(CalMergeError::MissingCredentials("geocoder".into()));
        };

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("address", raw), ("key", api_key)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CalMergeError::LookupTimeout(self.timeout.as_secs())
                } else {
                    CalMergeError::Lookup(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalMergeError::Lookup(format!("HTTP {status}")));
        }

        let body: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| CalMergeError::Lookup(format!("invalid response: {e}")))?;

        if body.status != "OK" {
            let detail = body.error_message.unwrap_or_default();
            return Err(CalMergeError::Lookup(
                format!("status {} {detail}", body.status).trim_end().to_string(),
            ));
        }

        body.results
            .first()
            .and_then(GeocodeResult::concise_label)
            .ok_or_else(|| CalMergeError::Lookup("no usable result".into()))
    }
}
