//! Shared ambient stack for the adapter services
//!
//! - `logging`: tracing subscriber bootstrap (console + daily rolling file)
//! - `config_loader`: layered figment loading (defaults, file, environment)

pub mod config_loader;
pub mod logging;

pub use config_loader::{load_config, ConfigFormat};
pub use logging::{flush, init, init_with_config, LogConfig};
