// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for configuration files that Village uses to simplify
//! the process of serialization and deserialization. There are two of them:
//!
//! - The project definition `village.yaml` that ties a local source tree to a
//!   remote script.
//! - Process [`Settings`] that tell the CLI where the platform API and the
//!   identity provider live.

use crate::path::village_home_dir;

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::Path,
    str::FromStr,
};
use tracing::debug;

/// Project definition layout.
///
/// Every deployable project carries a `village.yaml` at its top-level. The
/// `id` field is the join key between the local source tree and the remote
/// script entity. Deployment reads this file but never writes to it.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct DeploymentConfig {
    /// Identifier of the remote script.
    pub id: String,

    /// Human readable name of the script.
    pub name: String,

    /// Runtime the script is executed with.
    pub engine: Engine,

    /// Version of the runtime, e.g., "18" or "3.10".
    pub engine_version: String,

    /// Parameters the script accepts when run.
    #[serde(default)]
    pub params: BTreeMap<String, ConfigParam>,
}

impl FromStr for DeploymentConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl DeploymentConfig {
    /// Render as `village.yaml` contents.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Serialize`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ConfigError::Serialize)
    }
}

/// Script runtime.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Engine {
    Node,
    Python,
}

impl Engine {
    /// All available engines.
    pub const ALL: [Engine; 2] = [Engine::Node, Engine::Python];

    /// Runtime versions that the platform can build for.
    pub fn versions(&self) -> &'static [&'static str] {
        match self {
            Self::Node => &["16", "17", "18"],
            Self::Python => &["3.8", "3.9", "3.10"],
        }
    }
}

impl Display for Engine {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Node => fmt.write_str("NODE"),
            Self::Python => fmt.write_str("PYTHON"),
        }
    }
}

/// Script parameter declaration.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ConfigParam {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub default: Option<String>,

    #[serde(default = "required_by_default")]
    pub required: bool,

    #[serde(default)]
    pub options: Vec<ParamOption>,

    #[serde(rename = "type")]
    pub kind: ParamType,
}

fn required_by_default() -> bool {
    true
}

/// Kind of value a parameter accepts.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamType {
    #[default]
    String,
    Bigstring,
    Integer,
    Float,
    Boolean,
    Date,
    Datetime,
}

/// Allowed value for a parameter.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamOption {
    Plain(String),
    Detailed { label: String, value: String },
}

/// Process settings.
///
/// Locations of the platform API and of the OAuth authorization server, plus
/// the OAuth client identity to use against the latter.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub api_base_url: String,

    #[serde(default)]
    pub auth_domain: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub audience: String,
}

impl Settings {
    /// Load settings from environment with `config.toml` fallback.
    ///
    /// Each field comes from its environment variable first, then from the
    /// same key in `config.toml` inside of Village's home directory, then
    /// degrades to the empty string. Missing values are never an error.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Settings`] if `config.toml` exists but cannot
    ///   be parsed.
    pub fn load() -> Result<Self> {
        let file = match village_home_dir() {
            Ok(home) => Self::from_file(home.join("config.toml"))?,
            Err(err) => {
                debug!("no settings file: {err}");
                None
            }
        };

        Ok(Self::from_env_or(file.unwrap_or_default()))
    }

    /// Read settings file, if it exists.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Settings`] if the file cannot be parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let data = match read_to_string(path.as_ref()) {
            Ok(data) => data,
            Err(err) => {
                debug!("skip settings file {:?}: {err}", path.as_ref().display());
                return Ok(None);
            }
        };

        Ok(Some(data.parse()?))
    }

    /// Overlay environment variables on top of fallback settings.
    pub fn from_env_or(fallback: Self) -> Self {
        let pick = |key: &str, fallback: String| match std::env::var(key) {
            Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => fallback,
        };

        Self {
            api_base_url: trim_url(pick("API_BASE_URL", fallback.api_base_url)),
            auth_domain: trim_url(pick("AUTH0_DOMAIN", fallback.auth_domain)),
            client_id: pick("AUTH0_CLIENT_ID", fallback.client_id),
            audience: pick("AUTH0_AUDIENCE", fallback.audience),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::from_str(data).map_err(ConfigError::Settings)
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize project definition.
    #[error(transparent)]
    Deserialize(serde_yaml::Error),

    /// Failed to serialize project definition.
    #[error(transparent)]
    Serialize(serde_yaml::Error),

    /// Failed to parse settings file.
    #[error(transparent)]
    Settings(#[from] toml::de::Error),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn deserialize_deployment_config() -> anyhow::Result<()> {
        let result: DeploymentConfig = indoc! {r#"
            id: abc123
            name: My Script
            engine: PYTHON
            engine_version: "3.10"
            params:
              city:
                description: City to report on
                default: Paris
                options:
                  - Paris
                  - label: Berlin, DE
                    value: berlin
                type: STRING
              days:
                required: false
                type: INTEGER
        "#}
        .parse()?;

        let expect = DeploymentConfig {
            id: "abc123".into(),
            name: "My Script".into(),
            engine: Engine::Python,
            engine_version: "3.10".into(),
            params: BTreeMap::from([
                (
                    "city".into(),
                    ConfigParam {
                        description: Some("City to report on".into()),
                        default: Some("Paris".into()),
                        required: true,
                        options: vec![
                            ParamOption::Plain("Paris".into()),
                            ParamOption::Detailed {
                                label: "Berlin, DE".into(),
                                value: "berlin".into(),
                            },
                        ],
                        kind: ParamType::String,
                    },
                ),
                (
                    "days".into(),
                    ConfigParam {
                        required: false,
                        kind: ParamType::Integer,
                        ..Default::default()
                    },
                ),
            ]),
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn deployment_config_without_params() -> anyhow::Result<()> {
        let result: DeploymentConfig = indoc! {r#"
            id: abc123
            name: My Script
            engine: NODE
            engine_version: "18"
        "#}
        .parse()?;

        assert_eq!(result.params, BTreeMap::new());
        assert_eq!(result.engine, Engine::Node);

        let again: DeploymentConfig = result.to_yaml()?.parse()?;
        assert_eq!(again, result);

        Ok(())
    }

    #[test]
    fn deployment_config_rejects_unknown_engine() {
        let result = indoc! {r#"
            id: abc123
            name: My Script
            engine: RUBY
            engine_version: "3"
        "#}
        .parse::<DeploymentConfig>();

        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[sealed_test(env = [
        ("API_BASE_URL", "https://api.village.dev/"),
        ("AUTH0_CLIENT_ID", "  client-from-env  "),
        ("AUTH0_DOMAIN", ""),
        ("AUTH0_AUDIENCE", ""),
    ])]
    fn settings_prefer_env_over_file() -> anyhow::Result<()> {
        let file: Settings = indoc! {r#"
            api_base_url = "http://localhost:8000"
            auth_domain = "https://village.eu.auth0.com/"
            client_id = "client-from-file"
        "#}
        .parse()?;

        let result = Settings::from_env_or(file);
        let expect = Settings {
            api_base_url: "https://api.village.dev".into(),
            auth_domain: "https://village.eu.auth0.com".into(),
            client_id: "client-from-env".into(),
            audience: "".into(),
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[sealed_test(env = [("VILLAGE_HOME", "/nonexistent/village")])]
    fn settings_degrade_to_empty_strings() -> anyhow::Result<()> {
        for key in ["API_BASE_URL", "AUTH0_DOMAIN", "AUTH0_CLIENT_ID", "AUTH0_AUDIENCE"] {
            std::env::remove_var(key);
        }

        assert_eq!(Settings::load()?, Settings::default());

        Ok(())
    }
}
