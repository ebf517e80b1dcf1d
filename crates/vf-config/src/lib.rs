//! Configuration loading for vFlow
//!
//! `vflow.yaml` is plain YAML extended with a few tags:
//!
//! - `!include path` - Replace the node with another YAML file
//! - `!include_dir_merge_list dir` - Concatenate the lists of every YAML file in a directory
//! - `!secret key` - Substitute a value from `secrets.yaml`
//! - `!env_var NAME` - Substitute an environment variable
//!
//! The expanded document is then deserialized into [`VflowConfig`]: the
//! `engine:` section with the detector tuning knobs, and the `workflows:`
//! list.
//!
//! # Example
//!
//! ```ignore
//! use vf_config::load_config;
//!
//! let config = load_config("/etc/vflow", "vflow.yaml")?;
//! println!("{} workflows", config.workflows.len());
//! ```

mod error;
mod loader;
mod secrets;
mod settings;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;
pub use settings::{
    load_config, ActivationResetPolicy, AppTransitionSettings, BackTapSettings, EngineConfig,
    GeofenceSettings, KeyEventSettings, LoggerSettings, RuleSettings, SubscriptionSettings,
    VflowConfig,
};

pub use serde_yaml::Value;
