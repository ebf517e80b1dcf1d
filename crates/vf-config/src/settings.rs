//! Typed engine settings
//!
//! Every field has a default, so an absent or empty `engine:` section yields
//! the built-in tuning constants.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, warn};
use vf_core::Workflow;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

/// Top-level document of `vflow.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VflowConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

/// Tuning knobs for every detector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub key_event: KeyEventSettings,
    pub back_tap: BackTapSettings,
    pub app_transition: AppTransitionSettings,
    pub geofence: GeofenceSettings,
    pub subscription: SubscriptionSettings,
    pub rules: RuleSettings,
    pub logger: LoggerSettings,
}

impl EngineConfig {
    /// Check cross-field constraints serde cannot express
    ///
    /// A triple window shorter than the double window plus the grace period
    /// would let a third tap land outside the window while the double is
    /// still held back.
    pub fn validate(&self) -> ConfigResult<()> {
        check_tap_windows(
            "engine.key_event",
            self.key_event.double_click_window_ms,
            self.key_event.triple_grace_ms,
            self.key_event.triple_window_ms,
        )?;
        check_tap_windows(
            "engine.back_tap",
            self.back_tap.double_tap_window_ms,
            self.back_tap.triple_grace_ms,
            self.back_tap.triple_tap_window_ms,
        )
    }
}

fn check_tap_windows(section: &str, double_ms: u64, grace_ms: u64, triple_ms: u64) -> ConfigResult<()> {
    if triple_ms < double_ms.saturating_add(grace_ms) {
        return Err(ConfigError::Schema {
            section: section.to_string(),
            message: format!(
                "triple window ({triple_ms} ms) must be at least the double window plus grace ({double_ms} + {grace_ms} ms)"
            ),
        });
    }
    Ok(())
}

/// Hardware key and alert slider classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyEventSettings {
    pub double_click_window_ms: u64,
    pub long_press_ms: u64,
    pub triple_window_ms: u64,
    /// How long a double click is held back waiting for a third press
    pub triple_grace_ms: u64,
    pub slider_debounce_ms: u64,
}

impl Default for KeyEventSettings {
    fn default() -> Self {
        Self {
            double_click_window_ms: 400,
            long_press_ms: 500,
            triple_window_ms: 750,
            triple_grace_ms: 200,
            slider_debounce_ms: 200,
        }
    }
}

impl KeyEventSettings {
    pub fn double_click_window(&self) -> Duration {
        Duration::from_millis(self.double_click_window_ms)
    }

    pub fn long_press(&self) -> Duration {
        Duration::from_millis(self.long_press_ms)
    }

    pub fn triple_window(&self) -> Duration {
        Duration::from_millis(self.triple_window_ms)
    }

    pub fn triple_grace(&self) -> Duration {
        Duration::from_millis(self.triple_grace_ms)
    }

    pub fn slider_debounce(&self) -> Duration {
        Duration::from_millis(self.slider_debounce_ms)
    }
}

/// Accelerometer knock detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackTapSettings {
    /// Added to 0.25 and scaled by 15 to get the magnitude delta threshold
    pub sensitivity: f64,
    pub min_tap_interval_ms: u64,
    pub double_tap_window_ms: u64,
    pub triple_tap_window_ms: u64,
    pub triple_grace_ms: u64,
}

impl Default for BackTapSettings {
    fn default() -> Self {
        Self {
            sensitivity: 0.05,
            min_tap_interval_ms: 100,
            double_tap_window_ms: 500,
            triple_tap_window_ms: 750,
            triple_grace_ms: 200,
        }
    }
}

impl BackTapSettings {
    /// Magnitude delta, in m/s², above which a sample counts as a tap
    pub fn threshold(&self) -> f64 {
        15.0 * (0.25 + self.sensitivity)
    }

    pub fn min_tap_interval(&self) -> Duration {
        Duration::from_millis(self.min_tap_interval_ms)
    }

    pub fn double_tap_window(&self) -> Duration {
        Duration::from_millis(self.double_tap_window_ms)
    }

    pub fn triple_tap_window(&self) -> Duration {
        Duration::from_millis(self.triple_tap_window_ms)
    }

    pub fn triple_grace(&self) -> Duration {
        Duration::from_millis(self.triple_grace_ms)
    }
}

/// Foreground transition noise filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppTransitionSettings {
    /// Packages whose windows never count as a foreground change
    pub ignored_packages: Vec<String>,
    /// Home screen packages; leaving an app for one of these is debounced
    pub launcher_packages: Vec<String>,
    pub popup_window_ms: u64,
    /// More repeats than this inside the popup window marks a popup storm
    pub popup_max_repeats: usize,
    pub launcher_debounce_ms: u64,
    pub reconcile_interval_ms: u64,
    pub stale_after_ms: u64,
}

impl Default for AppTransitionSettings {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            ignored_packages: owned(&[
                "android",
                "com.android.systemui",
                "com.google.android.inputmethod.latin",
                "com.sohu.inputmethod.sogou",
                "com.baidu.input",
                "com.iflytek.inputmethod",
                "com.android.permissioncontroller",
            ]),
            launcher_packages: owned(&[
                "com.android.launcher",
                "com.android.launcher3",
                "com.google.android.apps.nexuslauncher",
                "com.miui.home",
                "com.huawei.android.launcher",
                "com.oppo.launcher",
                "com.bbk.launcher2",
                "com.sec.android.app.launcher",
            ]),
            popup_window_ms: 1000,
            popup_max_repeats: 3,
            launcher_debounce_ms: 500,
            reconcile_interval_ms: 30_000,
            stale_after_ms: 60_000,
        }
    }
}

impl AppTransitionSettings {
    pub fn is_ignored(&self, package: &str) -> bool {
        self.ignored_packages.iter().any(|p| p == package)
    }

    pub fn is_launcher(&self, package: &str) -> bool {
        self.launcher_packages.iter().any(|p| p == package)
    }

    pub fn popup_window(&self) -> Duration {
        Duration::from_millis(self.popup_window_ms)
    }

    pub fn launcher_debounce(&self) -> Duration {
        Duration::from_millis(self.launcher_debounce_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// Adaptive location tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceSettings {
    /// Fixes closer than this to the last accepted one are dropped
    pub min_distance_m: f64,
    pub min_interval_ms: u64,
    /// Beyond this distance from every fence edge only passive updates are used
    pub passive_beyond_m: f64,
    /// Beyond this distance coarse updates are used, precise ones inside it
    pub coarse_beyond_m: f64,
    pub tier_hysteresis_ms: u64,
    /// Where fence containment is persisted; in memory when absent
    pub state_file: Option<PathBuf>,
}

impl Default for GeofenceSettings {
    fn default() -> Self {
        Self {
            min_distance_m: 5.0,
            min_interval_ms: 1000,
            passive_beyond_m: 10_000.0,
            coarse_beyond_m: 500.0,
            tier_hysteresis_ms: 10_000,
            state_file: None,
        }
    }
}

impl GeofenceSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn tier_hysteresis(&self) -> Duration {
        Duration::from_millis(self.tier_hysteresis_ms)
    }
}

/// Rule subscription fetching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    pub cache_dir: PathBuf,
    pub ttl_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("vflow").join("gkd_rules"),
            ttl_secs: 3600,
            request_timeout_secs: 30,
        }
    }
}

impl SubscriptionSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// When per-rule activation counters start over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationResetPolicy {
    /// Counters live as long as the workflow is registered
    Never,
    /// Counters reset when the workflow's rules are (re)loaded
    #[default]
    OnReload,
    /// Counters reset whenever the foreground app changes
    OnAppChange,
}

/// Screen rule execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    pub activation_reset: ActivationResetPolicy,
    pub default_action_cd_ms: u64,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            activation_reset: ActivationResetPolicy::default(),
            default_action_cd_ms: 1000,
        }
    }
}

/// Log filtering for the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub default: String,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            default: "info".to_string(),
        }
    }
}

/// Load `file` from `config_dir` and deserialize it
///
/// The `engine:` section must fit the schema. Workflows are deserialized one
/// by one so a malformed entry only drops itself.
pub fn load_config(config_dir: impl AsRef<Path>, file: impl AsRef<Path>) -> ConfigResult<VflowConfig> {
    let mut loader = YamlLoader::new(config_dir.as_ref())?;
    let document = loader.load_file(file)?;
    config_from_value(document)
}

fn config_from_value(document: Value) -> ConfigResult<VflowConfig> {
    let engine = match document.get("engine") {
        None | Some(Value::Null) => EngineConfig::default(),
        Some(section) => {
            serde_yaml::from_value(section.clone()).map_err(|e| ConfigError::Schema {
                section: "engine".to_string(),
                message: e.to_string(),
            })?
        }
    };
    engine.validate()?;

    let mut workflows = Vec::new();
    match document.get("workflows") {
        None | Some(Value::Null) => {}
        Some(Value::Sequence(items)) => {
            for (index, item) in items.iter().enumerate() {
                match serde_yaml::from_value::<Workflow>(item.clone()) {
                    Ok(workflow) => workflows.push(workflow),
                    Err(e) => warn!(index, error = %e, "Skipping malformed workflow"),
                }
            }
        }
        Some(_) => {
            return Err(ConfigError::Schema {
                section: "workflows".to_string(),
                message: "expected a list".to_string(),
            })
        }
    }

    debug!(workflows = workflows.len(), "Configuration loaded");
    Ok(VflowConfig { engine, workflows })
}
