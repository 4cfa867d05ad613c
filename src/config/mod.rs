//! Configuration module
//!
//! - types/mod.rs: `BotConfig`, the gateway connection settings
//! - types/log.rs: logging settings
//! - io.rs: loading from files and environment, saving
//! - validation.rs: errors and warnings for a loaded config

mod io;
mod types;
mod validation;

pub use types::{BotConfig, LogConfig, LogFormat, DEFAULT_ENDPOINT};

pub use io::{
    apply_env_overrides, load_config, load_config_from_path, save_config, CONFIG_PATH_ENV,
    DEFAULT_CONFIG_FILE,
};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
