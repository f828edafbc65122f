//! Configuration schema and loading.

mod load;
mod schema;

pub use load::{ConfigError, default_config_path, load, load_from};
pub use schema::{Config, LogFormat, LoggingConfig};
