//! Configuration for the app configuration agent
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `ALGA_APPCONFIG_*` environment variables.

mod settings;

pub use settings::*;
