pub mod config;
pub mod error;
pub mod params;
pub mod types;

pub use config::{load_config, parse_config, AppConfig, CubeConfig, FileConfig, LogFormat};
pub use error::GeomediaError;
pub use params::*;
pub use types::*;
