use crate::config::AppConfig;
use crate::error::EngineError;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging TOML, environment variables, and JSON.
    ///
    /// Precedence: `config/Config.toml` < `FUNDING_ARB_`-prefixed env vars;
    /// `config/Config.json` fills gaps without overriding.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed, or
    /// if the merged configuration fails [`AppConfig::validate`].
    pub fn load() -> Result<AppConfig> {
        Self::load_from(Figment::new().merge(Toml::file("config/Config.toml")))
    }

    /// Loads application configuration with a specific profile overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed, or
    /// if the merged configuration fails validation.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        Self::load_from(
            Figment::new()
                .merge(Toml::file("config/Config.toml"))
                .merge(Toml::file(format!("config/Config.{profile}.toml"))),
        )
    }

    fn load_from(figment: Figment) -> Result<AppConfig> {
        let config: AppConfig = figment
            .merge(Env::prefixed("FUNDING_ARB_").split("__"))
            .join(Json::file("config/Config.json"))
            .extract()
            .map_err(|e| EngineError::ConfigInvalid(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }
}
