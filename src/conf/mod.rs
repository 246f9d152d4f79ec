//! Provides application configuration options.
//!
//! Configuration options can be parsed from config files in TOML format.

pub mod ice;
pub mod log;

use std::collections::HashMap;

use config::{
    Config, ConfigError, Environment, File, FileFormat, Source, Value,
};
use failure::Error;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

pub use self::{ice::Ice, log::Log};

/// CLI argument that is responsible for holding application configuration
/// file path.
static APP_CONF_PATH_CMD_ARG_NAME: &str = "--conf";
/// Environment variable that is responsible for holding application
/// configuration file path.
static APP_CONF_PATH_ENV_VAR_NAME: &str = "CONFAB_CONF";

/// Holds application config.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Conf {
    /// ICE candidate handling settings.
    pub ice: Ice,

    /// Logging settings.
    pub log: Log,
}

impl Source for Conf {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new((*self).clone())
    }

    fn collect(&self) -> Result<HashMap<String, Value>, ConfigError> {
        let serialized = toml::to_string(self).unwrap();
        File::from_str(serialized.as_str(), FileFormat::Toml).collect()
    }
}

impl Conf {
    /// Creates new [`Conf`] and applies values from the following sources,
    /// in that order:
    /// - default values;
    /// - configuration file, the name of which is given as a command line
    ///   parameter or environment variable;
    /// - environment variables.
    ///
    /// # Errors
    ///
    /// Errors if parsing fails.
    pub fn parse() -> Result<Self, Error> {
        let mut cfg = Config::default();

        cfg.merge(Self::default())?;

        if let Some(path) = get_conf_file_name(
            std::env::var(APP_CONF_PATH_ENV_VAR_NAME).ok(),
            std::env::args(),
        ) {
            cfg.merge(File::with_name(&path))?;
        }

        cfg.merge(Environment::with_prefix("CONFAB").separator("__"))?;

        Ok(cfg.try_into()?)
    }
}

/// Returns the name of the configuration file, if provided.
fn get_conf_file_name<T>(env_var: Option<String>, cmd_args: T) -> Option<String>
where
    T: IntoIterator<Item = String>,
{
    if env_var.is_some() {
        return env_var;
    }
    let mut args = cmd_args
        .into_iter()
        .skip_while(|arg| arg != APP_CONF_PATH_CMD_ARG_NAME);
    if args.next().is_some() {
        args.next()
    } else {
        None
    }
}

/// Parses [`Conf`] with the given environment variables set, removing them
/// afterwards.
#[cfg(test)]
#[macro_export]
macro_rules! overrided_by_env_conf {
    ($($env:expr => $value:expr),+ $(,)?) => {{
        $(::std::env::set_var($env, $value);)+
        let conf = crate::conf::Conf::parse().unwrap();
        $(::std::env::remove_var($env);)+
        conf
    }};
}
