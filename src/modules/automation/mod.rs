//! Automation heuristics.
//!
//! Runs a fixed battery of independent environment probes and reports an
//! automated environment when any of them matches. A probe that fails counts
//! as a non-match and never stops the remaining probes.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::fmt;

use crate::external_deps::environment::{EnvironmentProbe, ProbeError};

/// Globals injected by Selenium, WebDriver, ChromeDriver, PhantomJS and
/// similar drivers.
pub const AUTOMATION_MARKERS: &[&str] = &[
    "__webdriver_evaluate",
    "__selenium_evaluate",
    "__webdriver_script_function",
    "__webdriver_script_func",
    "__webdriver_script_fn",
    "__fxdriver_evaluate",
    "__driver_unwrapped",
    "__webdriver_unwrapped",
    "__driver_evaluate",
    "__selenium_unwrapped",
    "__fxdriver_unwrapped",
    "_Selenium_IDE_Recorder",
    "_selenium",
    "calledSelenium",
    "$cdc_asdjflasutopfhvcZLmcfl_",
    "$chrome_asyncScriptInfo",
    "__$webdriverAsyncExecutor",
    "domAutomation",
    "domAutomationController",
    "callPhantom",
    "_phantom",
    "__nightmare",
];

pub const USER_AGENT_DENY_LIST: &[&str] =
    &["headless", "phantom", "selenium", "chromedriver", "bot"];

static USER_AGENT_RE: Lazy<Regex> = Lazy::new(|| {
    let pattern = USER_AGENT_DENY_LIST
        .iter()
        .map(|token| regex::escape(token))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .expect("deny-list pattern is valid")
});

/// Probe families evaluated by [`AutomationDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutomationProbe {
    WebdriverFlag,
    MissingChromeRuntime,
    ZeroOuterDimensions,
    AutomationMarkers,
    UserAgentDenyList,
    MissingBrowserApis,
    MissingPointerInput,
}

impl AutomationProbe {
    pub const ALL: [AutomationProbe; 7] = [
        AutomationProbe::WebdriverFlag,
        AutomationProbe::MissingChromeRuntime,
        AutomationProbe::ZeroOuterDimensions,
        AutomationProbe::AutomationMarkers,
        AutomationProbe::UserAgentDenyList,
        AutomationProbe::MissingBrowserApis,
        AutomationProbe::MissingPointerInput,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AutomationProbe::WebdriverFlag => "webdriver_flag",
            AutomationProbe::MissingChromeRuntime => "missing_chrome_runtime",
            AutomationProbe::ZeroOuterDimensions => "zero_outer_dimensions",
            AutomationProbe::AutomationMarkers => "automation_markers",
            AutomationProbe::UserAgentDenyList => "user_agent_deny_list",
            AutomationProbe::MissingBrowserApis => "missing_browser_apis",
            AutomationProbe::MissingPointerInput => "missing_pointer_input",
        }
    }
}

impl fmt::Display for AutomationProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Detailed outcome of one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutomationReport {
    pub matched: Vec<AutomationProbe>,
    /// Failed sub-checks, each counted as a non-match.
    pub failed: Vec<(AutomationProbe, String)>,
}

impl AutomationReport {
    pub fn is_automated(&self) -> bool {
        !self.matched.is_empty()
    }
}

/// OR-of-probes evaluator. Holds no state about previous evaluations.
#[derive(Debug, Clone, Default)]
pub struct AutomationDetector {
    disabled: HashSet<AutomationProbe>,
}

impl AutomationDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disabled(mut self, probe: AutomationProbe) -> Self {
        self.disabled.insert(probe);
        self
    }

    pub fn detect(&self, env: &dyn EnvironmentProbe) -> bool {
        self.evaluate(env).is_automated()
    }

    pub fn evaluate(&self, env: &dyn EnvironmentProbe) -> AutomationReport {
        let mut report = AutomationReport::default();

        for probe in AutomationProbe::ALL {
            if self.disabled.contains(&probe) {
                continue;
            }
            let mut failures = Vec::new();
            if run_probe(probe, env, &mut failures) {
                report.matched.push(probe);
            }
            for err in failures {
                log::debug!("automation probe {} failed: {}", probe, err);
                report.failed.push((probe, err.to_string()));
            }
        }

        report
    }
}

/// Evaluates one family; every failed sub-check is pushed to `failures` and
/// treated as "no match".
fn run_probe(
    probe: AutomationProbe,
    env: &dyn EnvironmentProbe,
    failures: &mut Vec<ProbeError>,
) -> bool {
    let mut isolate = |result: Result<bool, ProbeError>| match result {
        Ok(matched) => matched,
        Err(err) => {
            failures.push(err);
            false
        }
    };

    match probe {
        AutomationProbe::WebdriverFlag => isolate(env.webdriver_flag()),
        AutomationProbe::MissingChromeRuntime => isolate(env.has_chrome_runtime().map(|has| !has)),
        AutomationProbe::ZeroOuterDimensions => {
            isolate(env.outer_dimensions().map(|(w, h)| w == 0 && h == 0))
        }
        AutomationProbe::AutomationMarkers => {
            let mut found = false;
            for marker in AUTOMATION_MARKERS {
                found |= isolate(env.has_global(marker));
            }
            found
        }
        AutomationProbe::UserAgentDenyList => {
            isolate(env.user_agent().map(|agent| USER_AGENT_RE.is_match(&agent)))
        }
        AutomationProbe::MissingBrowserApis => {
            let no_storage = isolate(env.has_storage_api().map(|has| !has));
            let no_notifications = isolate(env.has_notification_api().map(|has| !has));
            no_storage || no_notifications
        }
        AutomationProbe::MissingPointerInput => {
            let no_touch = isolate(env.has_touch_support().map(|has| !has));
            let no_mouse = isolate(env.has_mouse_support().map(|has| !has));
            no_touch && no_mouse
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::environment::StaticEnvironment;

    /// Wraps a snapshot and makes chosen signals fail.
    struct FaultyEnvironment {
        inner: StaticEnvironment,
        broken_user_agent: bool,
        broken_globals: HashSet<&'static str>,
    }

    impl EnvironmentProbe for FaultyEnvironment {
        fn webdriver_flag(&self) -> Result<bool, ProbeError> {
            self.inner.webdriver_flag()
        }

        fn has_chrome_runtime(&self) -> Result<bool, ProbeError> {
            self.inner.has_chrome_runtime()
        }

        fn outer_dimensions(&self) -> Result<(u32, u32), ProbeError> {
            self.inner.outer_dimensions()
        }

        fn has_global(&self, name: &str) -> Result<bool, ProbeError> {
            if self.broken_globals.contains(name) {
                return Err(ProbeError::Evaluation(format!("{name} access denied")));
            }
            self.inner.has_global(name)
        }

        fn user_agent(&self) -> Result<String, ProbeError> {
            if self.broken_user_agent {
                return Err(ProbeError::Evaluation("userAgent getter threw".into()));
            }
            self.inner.user_agent()
        }

        fn has_storage_api(&self) -> Result<bool, ProbeError> {
            self.inner.has_storage_api()
        }

        fn has_notification_api(&self) -> Result<bool, ProbeError> {
            self.inner.has_notification_api()
        }

        fn has_touch_support(&self) -> Result<bool, ProbeError> {
            self.inner.has_touch_support()
        }

        fn has_mouse_support(&self) -> Result<bool, ProbeError> {
            self.inner.has_mouse_support()
        }
    }

    #[test]
    fn regular_desktop_is_not_flagged() {
        let report = AutomationDetector::new().evaluate(&StaticEnvironment::desktop());
        assert!(!report.is_automated());
        assert!(report.failed.is_empty());
    }

    #[test]
    fn each_family_flags_on_its_own() {
        let detector = AutomationDetector::new();
        let cases = [
            (StaticEnvironment::desktop().with_webdriver(true), AutomationProbe::WebdriverFlag),
            (
                StaticEnvironment::desktop().with_chrome_runtime(false),
                AutomationProbe::MissingChromeRuntime,
            ),
            (
                StaticEnvironment::desktop().with_outer_dimensions(0, 0),
                AutomationProbe::ZeroOuterDimensions,
            ),
            (
                StaticEnvironment::desktop().with_global("domAutomationController"),
                AutomationProbe::AutomationMarkers,
            ),
            (
                StaticEnvironment::desktop().with_user_agent("Mozilla/5.0 HeadlessChrome/120.0"),
                AutomationProbe::UserAgentDenyList,
            ),
            (
                StaticEnvironment::desktop().with_notification_api(false),
                AutomationProbe::MissingBrowserApis,
            ),
            (
                StaticEnvironment::desktop().with_storage_api(false),
                AutomationProbe::MissingBrowserApis,
            ),
            (
                StaticEnvironment::desktop().with_pointer_input(false, false),
                AutomationProbe::MissingPointerInput,
            ),
        ];

        for (env, expected) in cases {
            let report = detector.evaluate(&env);
            assert_eq!(report.matched, vec![expected], "{expected}");
        }
    }

    #[test]
    fn one_zero_dimension_is_not_enough() {
        let env = StaticEnvironment::desktop().with_outer_dimensions(0, 900);
        assert!(!AutomationDetector::new().detect(&env));
    }

    #[test]
    fn user_agent_match_is_case_insensitive() {
        let env = StaticEnvironment::desktop().with_user_agent("Googlebot/2.1");
        assert!(AutomationDetector::new().detect(&env));
        let env = StaticEnvironment::desktop().with_user_agent("PhantomJS/2.1.1");
        assert!(AutomationDetector::new().detect(&env));
    }

    #[test]
    fn failing_probe_does_not_mask_other_matches() {
        let env = FaultyEnvironment {
            inner: StaticEnvironment::desktop().with_webdriver(true),
            broken_user_agent: true,
            broken_globals: HashSet::new(),
        };
        let report = AutomationDetector::new().evaluate(&env);
        assert!(report.is_automated());
        assert_eq!(report.matched, vec![AutomationProbe::WebdriverFlag]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, AutomationProbe::UserAgentDenyList);
    }

    #[test]
    fn failing_marker_check_does_not_abort_the_rest() {
        let env = FaultyEnvironment {
            inner: StaticEnvironment::desktop().with_global("callPhantom"),
            broken_user_agent: false,
            broken_globals: ["__webdriver_evaluate", "_selenium"].into_iter().collect(),
        };
        let report = AutomationDetector::new().evaluate(&env);
        assert_eq!(report.matched, vec![AutomationProbe::AutomationMarkers]);
        assert_eq!(report.failed.len(), 2);
    }

    #[test]
    fn empty_environment_fails_open_per_probe() {
        let report = AutomationDetector::new().evaluate(&StaticEnvironment::default());
        assert!(!report.is_automated());
        assert!(!report.failed.is_empty());
    }

    #[test]
    fn disabled_families_are_skipped() {
        let env = StaticEnvironment::desktop().with_chrome_runtime(false);
        let detector =
            AutomationDetector::new().with_disabled(AutomationProbe::MissingChromeRuntime);
        assert!(!detector.detect(&env));
    }

    #[test]
    fn verdict_follows_environment_changes() {
        let detector = AutomationDetector::new();
        let mut env = StaticEnvironment::desktop();
        assert!(!detector.detect(&env));
        env.outer_width = Some(0);
        env.outer_height = Some(0);
        assert!(detector.detect(&env));
    }
}
