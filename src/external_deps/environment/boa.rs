use std::cell::RefCell;

use boa_engine::{Context, JsValue, Source};

use super::{EnvironmentProbe, ProbeError};

const DESKTOP_PRELUDE: &str = r#"
var navigator = {
    userAgent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 " +
        "(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    language: "en-US",
    languages: ["en-US", "en"],
    platform: "Win32",
    webdriver: false,
    maxTouchPoints: 0
};
var window = {
    navigator: navigator,
    chrome: { runtime: {} },
    outerWidth: 1920,
    outerHeight: 1040,
    localStorage: {},
    sessionStorage: {},
    Notification: function() {},
    onmousemove: null
};
"#;

/// Evaluates each probe as a JavaScript expression against a scripted
/// environment. A thrown exception surfaces as `ProbeError::Evaluation`.
pub struct BoaEnvironmentProbe {
    context: RefCell<Context>,
}

impl BoaEnvironmentProbe {
    /// Runs `environment_script` once to define `window`, `navigator` and any
    /// other globals the probes read.
    pub fn new(environment_script: &str) -> Result<Self, ProbeError> {
        let mut context = Context::default();
        context
            .eval(Source::from_bytes(environment_script))
            .map_err(|err| ProbeError::Evaluation(err.to_string()))?;
        Ok(Self {
            context: RefCell::new(context),
        })
    }

    /// Environment modelled on a regular desktop Chrome.
    pub fn desktop() -> Result<Self, ProbeError> {
        Self::new(DESKTOP_PRELUDE)
    }

    /// Runs extra script in the same context, e.g. to inject a marker.
    pub fn run(&self, script: &str) -> Result<(), ProbeError> {
        self.eval(script).map(|_| ())
    }

    fn eval(&self, expression: &str) -> Result<JsValue, ProbeError> {
        let mut context = self
            .context
            .try_borrow_mut()
            .map_err(|_| ProbeError::Evaluation("probe context busy".into()))?;
        context
            .eval(Source::from_bytes(expression))
            .map_err(|err| ProbeError::Evaluation(err.to_string()))
    }

    fn eval_bool(&self, expression: &str) -> Result<bool, ProbeError> {
        Ok(self.eval(expression)?.to_boolean())
    }

    fn eval_dimension(&self, expression: &str) -> Result<u32, ProbeError> {
        let value = self.eval(expression)?;
        let mut context = self
            .context
            .try_borrow_mut()
            .map_err(|_| ProbeError::Evaluation("probe context busy".into()))?;
        let number = value
            .to_number(&mut context)
            .map_err(|err| ProbeError::Evaluation(err.to_string()))?;
        if !number.is_finite() {
            return Err(ProbeError::Evaluation(format!(
                "'{expression}' is not a finite number"
            )));
        }
        Ok(number.clamp(0.0, u32::MAX as f64) as u32)
    }

    fn eval_string(&self, expression: &str) -> Result<String, ProbeError> {
        let value = self.eval(expression)?;
        let mut context = self
            .context
            .try_borrow_mut()
            .map_err(|_| ProbeError::Evaluation("probe context busy".into()))?;
        value
            .to_string(&mut context)
            .map_err(|err| ProbeError::Evaluation(err.to_string()))?
            .to_std_string()
            .map_err(|_| ProbeError::Evaluation("unable to convert probe output".into()))
    }
}

impl std::fmt::Debug for BoaEnvironmentProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoaEnvironmentProbe").finish_non_exhaustive()
    }
}

impl EnvironmentProbe for BoaEnvironmentProbe {
    fn webdriver_flag(&self) -> Result<bool, ProbeError> {
        self.eval_bool("navigator.webdriver === true")
    }

    fn has_chrome_runtime(&self) -> Result<bool, ProbeError> {
        self.eval_bool("!!window.chrome")
    }

    fn outer_dimensions(&self) -> Result<(u32, u32), ProbeError> {
        Ok((
            self.eval_dimension("window.outerWidth")?,
            self.eval_dimension("window.outerHeight")?,
        ))
    }

    fn has_global(&self, name: &str) -> Result<bool, ProbeError> {
        let literal =
            serde_json::to_string(name).map_err(|err| ProbeError::Evaluation(err.to_string()))?;
        self.eval_bool(&format!("{literal} in window"))
    }

    fn user_agent(&self) -> Result<String, ProbeError> {
        self.eval_string("String(navigator.userAgent)")
    }

    fn has_storage_api(&self) -> Result<bool, ProbeError> {
        self.eval_bool(
            "typeof window.localStorage !== 'undefined' \
             && typeof window.sessionStorage !== 'undefined'",
        )
    }

    fn has_notification_api(&self) -> Result<bool, ProbeError> {
        self.eval_bool("'Notification' in window")
    }

    fn has_touch_support(&self) -> Result<bool, ProbeError> {
        self.eval_bool("'ontouchstart' in window || (navigator.maxTouchPoints || 0) > 0")
    }

    fn has_mouse_support(&self) -> Result<bool, ProbeError> {
        self.eval_bool("'onmousemove' in window")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_prelude_reads_like_a_browser() {
        let probe = BoaEnvironmentProbe::desktop().unwrap();
        assert_eq!(probe.webdriver_flag(), Ok(false));
        assert_eq!(probe.has_chrome_runtime(), Ok(true));
        assert_eq!(probe.outer_dimensions(), Ok((1920, 1040)));
        assert_eq!(probe.has_global("callPhantom"), Ok(false));
        assert!(probe.user_agent().unwrap().contains("Chrome/120"));
        assert_eq!(probe.has_storage_api(), Ok(true));
        assert_eq!(probe.has_notification_api(), Ok(true));
        assert_eq!(probe.has_touch_support(), Ok(false));
        assert_eq!(probe.has_mouse_support(), Ok(true));
    }

    #[test]
    fn injected_markers_are_visible() {
        let probe = BoaEnvironmentProbe::desktop().unwrap();
        probe.run("window.callPhantom = function() {};").unwrap();
        assert_eq!(probe.has_global("callPhantom"), Ok(true));
        assert_eq!(probe.has_global("$cdc_asdjflasutopfhvcZLmcfl_"), Ok(false));
    }

    #[test]
    fn undefined_globals_surface_as_errors() {
        let probe = BoaEnvironmentProbe::new("var navigator = { userAgent: 'curl/8.0' };").unwrap();
        assert!(matches!(probe.has_chrome_runtime(), Err(ProbeError::Evaluation(_))));
        assert!(matches!(probe.has_global("_phantom"), Err(ProbeError::Evaluation(_))));
        assert_eq!(probe.user_agent().unwrap(), "curl/8.0");
    }
}
