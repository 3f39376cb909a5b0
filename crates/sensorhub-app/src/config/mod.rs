//! Configuration file parsing for sensorhub
//!
//! Supports `<config_dir>/sensorhub/config.toml`, or any path given on the
//! command line.

pub mod settings;
pub mod types;

pub use settings::{default_config_path, init_config, load_settings, CONFIG_FILENAME};
pub use types::*;
