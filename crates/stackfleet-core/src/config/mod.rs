//! User configuration
//!
//! Settings are read from `config.toml` in the platform config directory
//! (or an explicit path) and supply defaults for command-line flags.

pub mod parser;
pub mod schema;
pub mod store;

pub use parser::{parse_settings, parse_settings_str};
pub use schema::{DEFAULT_BOOTSTRAP_STACK, DEFAULT_WORKERS, PollingSettings, Settings};
pub use store::ConfigStore;
