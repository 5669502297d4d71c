//! Request fingerprint enrichment.
//!
//! Adds client environment attributes to outgoing request headers for
//! server-side correlation. Nothing here interprets the values.

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};

pub const TIMESTAMP_HEADER: HeaderName = HeaderName::from_static("x-client-timestamp");
pub const SCREEN_RESOLUTION_HEADER: HeaderName = HeaderName::from_static("x-screen-resolution");
pub const TIMEZONE_HEADER: HeaderName = HeaderName::from_static("x-timezone");
pub const LANGUAGE_HEADER: HeaderName = HeaderName::from_static("x-language");

/// Static attributes of the client the fingerprint describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientEnvironment {
    pub screen: (u32, u32),
    /// IANA timezone name.
    pub timezone: String,
    /// Primary language tag.
    pub language: String,
}

impl Default for ClientEnvironment {
    fn default() -> Self {
        Self {
            screen: (1920, 1080),
            timezone: "UTC".into(),
            language: "en-US".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRecord {
    pub timestamp_millis: u64,
    pub screen_resolution: String,
    pub timezone: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct FingerprintBuilder<C: Clock = SystemClock> {
    environment: ClientEnvironment,
    clock: C,
}

impl FingerprintBuilder<SystemClock> {
    pub fn new(environment: ClientEnvironment) -> Self {
        Self::with_clock(environment, SystemClock)
    }
}

impl<C: Clock> FingerprintBuilder<C> {
    pub fn with_clock(environment: ClientEnvironment, clock: C) -> Self {
        Self { environment, clock }
    }

    pub fn environment(&self) -> &ClientEnvironment {
        &self.environment
    }

    pub fn record(&self) -> FingerprintRecord {
        let (width, height) = self.environment.screen;
        FingerprintRecord {
            timestamp_millis: self.clock.now_millis(),
            screen_resolution: format!("{width}x{height}"),
            timezone: self.environment.timezone.clone(),
            language: self.environment.language.clone(),
        }
    }

    /// Returns a copy of `headers` with the fingerprint attached; the input is
    /// left untouched.
    pub fn enrich(&self, headers: &HeaderMap) -> HeaderMap {
        let record = self.record();
        let mut enriched = headers.clone();

        let fields = [
            (TIMESTAMP_HEADER, record.timestamp_millis.to_string()),
            (SCREEN_RESOLUTION_HEADER, record.screen_resolution),
            (TIMEZONE_HEADER, record.timezone),
            (LANGUAGE_HEADER, record.language),
        ];

        for (name, value) in fields {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    enriched.insert(name, value);
                }
                Err(_) => log::debug!("skipping fingerprint header {} with invalid value", name),
            }
        }

        enriched
    }
}
