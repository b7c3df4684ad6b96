pub mod config;
pub mod error;
pub mod model;

pub use config::{Config, ConfigError, Http2Mode};
pub use error::*;
pub use model::*;
