//! Client environment probes.
//!
//! Exposes the runtime signals the automation heuristics read, one method per
//! signal, so detection logic never touches a live browser directly.

mod boa;

pub use boa::BoaEnvironmentProbe;

use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

/// User agent reported by [`StaticEnvironment::desktop`].
pub const DESKTOP_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
    "(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
);

/// Read-only view of the client environment. Any method may fail; callers
/// treat a failure as a non-match for that signal.
pub trait EnvironmentProbe {
    /// Explicit automation flag (`navigator.webdriver`).
    fn webdriver_flag(&self) -> Result<bool, ProbeError>;

    /// Whether the `window.chrome` runtime object is present.
    fn has_chrome_runtime(&self) -> Result<bool, ProbeError>;

    /// `(outerWidth, outerHeight)`.
    fn outer_dimensions(&self) -> Result<(u32, u32), ProbeError>;

    /// Whether a property of the given name exists on the global scope.
    fn has_global(&self, name: &str) -> Result<bool, ProbeError>;

    fn user_agent(&self) -> Result<String, ProbeError>;

    fn has_storage_api(&self) -> Result<bool, ProbeError>;

    fn has_notification_api(&self) -> Result<bool, ProbeError>;

    fn has_touch_support(&self) -> Result<bool, ProbeError>;

    fn has_mouse_support(&self) -> Result<bool, ProbeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("signal '{0}' unavailable")]
    Unavailable(String),
    #[error("probe evaluation failed: {0}")]
    Evaluation(String),
}

/// Snapshot of client signals, typically reported by the client as JSON.
/// Absent fields make the matching probe fail.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticEnvironment {
    pub webdriver: Option<bool>,
    pub chrome_runtime: Option<bool>,
    pub outer_width: Option<u32>,
    pub outer_height: Option<u32>,
    pub globals: Option<HashSet<String>>,
    pub user_agent: Option<String>,
    pub storage_api: Option<bool>,
    pub notification_api: Option<bool>,
    pub touch_support: Option<bool>,
    pub mouse_support: Option<bool>,
}

impl StaticEnvironment {
    /// A regular desktop browser with every signal populated.
    pub fn desktop() -> Self {
        Self {
            webdriver: Some(false),
            chrome_runtime: Some(true),
            outer_width: Some(1920),
            outer_height: Some(1080),
            globals: Some(HashSet::new()),
            user_agent: Some(DESKTOP_USER_AGENT.into()),
            storage_api: Some(true),
            notification_api: Some(true),
            touch_support: Some(false),
            mouse_support: Some(true),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn with_webdriver(mut self, value: bool) -> Self {
        self.webdriver = Some(value);
        self
    }

    pub fn with_chrome_runtime(mut self, value: bool) -> Self {
        self.chrome_runtime = Some(value);
        self
    }

    pub fn with_outer_dimensions(mut self, width: u32, height: u32) -> Self {
        self.outer_width = Some(width);
        self.outer_height = Some(height);
        self
    }

    pub fn with_global(mut self, name: impl Into<String>) -> Self {
        self.globals.get_or_insert_with(HashSet::new).insert(name.into());
        self
    }

    pub fn with_user_agent(mut self, value: impl Into<String>) -> Self {
        self.user_agent = Some(value.into());
        self
    }

    pub fn with_storage_api(mut self, value: bool) -> Self {
        self.storage_api = Some(value);
        self
    }

    pub fn with_notification_api(mut self, value: bool) -> Self {
        self.notification_api = Some(value);
        self
    }

    pub fn with_pointer_input(mut self, touch: bool, mouse: bool) -> Self {
        self.touch_support = Some(touch);
        self.mouse_support = Some(mouse);
        self
    }
}

fn required<T: Clone>(value: &Option<T>, name: &str) -> Result<T, ProbeError> {
    value
        .clone()
        .ok_or_else(|| ProbeError::Unavailable(name.to_string()))
}

impl EnvironmentProbe for StaticEnvironment {
    fn webdriver_flag(&self) -> Result<bool, ProbeError> {
        required(&self.webdriver, "webdriver")
    }

    fn has_chrome_runtime(&self) -> Result<bool, ProbeError> {
        required(&self.chrome_runtime, "chromeRuntime")
    }

    fn outer_dimensions(&self) -> Result<(u32, u32), ProbeError> {
        Ok((
            required(&self.outer_width, "outerWidth")?,
            required(&self.outer_height, "outerHeight")?,
        ))
    }

    fn has_global(&self, name: &str) -> Result<bool, ProbeError> {
        self.globals
            .as_ref()
            .map(|globals| globals.contains(name))
            .ok_or_else(|| ProbeError::Unavailable("globals".into()))
    }

    fn user_agent(&self) -> Result<String, ProbeError> {
        required(&self.user_agent, "userAgent")
    }

    fn has_storage_api(&self) -> Result<bool, ProbeError> {
        required(&self.storage_api, "storageApi")
    }

    fn has_notification_api(&self) -> Result<bool, ProbeError> {
        required(&self.notification_api, "notificationApi")
    }

    fn has_touch_support(&self) -> Result<bool, ProbeError> {
        required(&self.touch_support, "touchSupport")
    }

    fn has_mouse_support(&self) -> Result<bool, ProbeError> {
        required(&self.mouse_support, "mouseSupport")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_report() {
        let env = StaticEnvironment::from_json(
            r#"{"webdriver": true, "outerWidth": 0, "outerHeight": 0, "globals": ["callPhantom"]}"#,
        )
        .unwrap();
        assert_eq!(env.webdriver_flag(), Ok(true));
        assert_eq!(env.outer_dimensions(), Ok((0, 0)));
        assert_eq!(env.has_global("callPhantom"), Ok(true));
        assert!(matches!(env.user_agent(), Err(ProbeError::Unavailable(_))));
    }
}
