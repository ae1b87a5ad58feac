//! Configuration types and loading for the restore service.
//!
//! Configuration is read from `configuration/base.*`, an environment specific file and
//! `APP_`-prefixed environment variables, see [`load_config`].

mod environment;
mod load;
pub mod shared;

pub use environment::{Environment, UnknownEnvironment};
pub use load::{Config, LoadConfigError, load_config, load_config_from};
