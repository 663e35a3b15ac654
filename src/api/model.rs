// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::config::{ConfigParam, Engine, ParamOption, ParamType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Group of users sharing scripts.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Display for Workspace {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} ({})", self.name, self.id)
    }
}

/// Platform user together with their workspaces.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
pub struct UserWithWorkspaces {
    pub id: String,

    #[serde(default)]
    pub default_workspace: Option<Workspace>,
}

/// Registered script.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
pub struct Script {
    pub id: String,
    pub name: String,
    pub engine: Engine,
    pub engine_version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub workspace_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Script with its build history.
#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct ScriptWithMeta {
    #[serde(flatten)]
    pub script: Script,

    #[serde(default)]
    pub builds: Vec<Build>,
}

impl ScriptWithMeta {
    /// Parameter declarations of the newest build, keyed by name.
    pub fn latest_params(&self) -> BTreeMap<String, ConfigParam> {
        self.builds
            .first()
            .map(|build| {
                build
                    .params
                    .iter()
                    .map(|param| (param.key.clone(), param.to_config()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Packaged version of a script.
#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct Build {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub params: Vec<BuildParam>,
}

/// Parameter declaration recorded with a build.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
pub struct BuildParam {
    pub key: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub options: Vec<ParamOption>,

    #[serde(rename = "type")]
    pub kind: ParamType,
}

impl BuildParam {
    pub fn to_config(&self) -> ConfigParam {
        ConfigParam {
            description: self.description.clone(),
            default: self.default.clone(),
            required: self.required,
            options: self.options.clone(),
            kind: self.kind,
        }
    }
}

/// Single execution of a build.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub build_id: Option<String>,

    #[serde(default)]
    pub output: Option<String>,
}

/// Cron-style trigger of a script.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub minute: String,
    pub hour: String,
    pub day_of_month: String,
    pub month_of_year: String,
    pub day_of_week: String,
}

impl Schedule {
    /// The five cron fields joined by spaces.
    pub fn cron(&self) -> String {
        [
            self.minute.as_str(),
            self.hour.as_str(),
            self.day_of_month.as_str(),
            self.month_of_year.as_str(),
            self.day_of_week.as_str(),
        ]
        .join(" ")
    }
}

/// Input of script registration.
///
/// An empty `id` lets the platform propose one from the name.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct CreateScriptInput {
    pub id: Option<String>,
    pub name: String,
    pub workspace_id: String,
    pub description: Option<String>,
    pub engine: Engine,
    pub engine_version: String,
}

/// Input of an on-demand run.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct RunScriptInput {
    pub script_id: String,
    pub params: BTreeMap<String, Value>,
}

impl RunScriptInput {
    /// Construct run input from `key=value` pairs.
    ///
    /// Pairs split at their first `=`, so values may contain `=` themselves.
    ///
    /// # Errors
    ///
    /// - Return [`InvalidParams`] if a pair has no `=` or an empty key.
    pub fn from_pairs(
        script_id: impl Into<String>,
        pairs: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, InvalidParams> {
        let mut params = BTreeMap::new();
        for pair in pairs {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    params.insert(key.to_string(), Value::String(value.to_string()));
                }
                _ => return Err(InvalidParams(pair.to_string())),
            }
        }

        Ok(Self {
            script_id: script_id.into(),
            params,
        })
    }
}

/// Run parameter not in `key=value` form.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("Invalid params format.")]
pub struct InvalidParams(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use simple_test_case::test_case;

    #[test]
    fn latest_params_come_from_newest_build() -> anyhow::Result<()> {
        let script: ScriptWithMeta = serde_json::from_value(json!({
            "id": "weather",
            "name": "Weather",
            "engine": "PYTHON",
            "engine_version": "3.10",
            "created_at": "2024-01-01T00:00:00+00:00",
            "updated_at": "2024-01-02T00:00:00+00:00",
            "builds": [
                {
                    "id": "b2",
                    "status": "SUCCESS",
                    "created_at": "2024-01-02T00:00:00Z",
                    "params": [
                        { "key": "city", "required": true, "type": "STRING", "default": "Paris" }
                    ]
                },
                {
                    "id": "b1",
                    "status": "SUCCESS",
                    "created_at": "2024-01-01T00:00:00Z",
                    "params": [{ "key": "old", "type": "INTEGER" }]
                }
            ]
        }))?;

        let expect = BTreeMap::from([(
            "city".to_string(),
            ConfigParam {
                default: Some("Paris".into()),
                required: true,
                kind: ParamType::String,
                ..Default::default()
            },
        )]);
        assert_eq!(script.latest_params(), expect);
        assert_eq!(script.script.engine, Engine::Python);

        Ok(())
    }

    #[test_case(&[], &[]; "no params")]
    #[test_case(&["city=Paris"], &[("city", "Paris")]; "single pair")]
    #[test_case(&["q=a=b", "n="], &[("n", ""), ("q", "a=b")]; "split at first equals")]
    #[test]
    fn run_params_from_pairs(pairs: &[&str], expect: &[(&str, &str)]) -> anyhow::Result<()> {
        use pretty_assertions::assert_eq;
        let input = RunScriptInput::from_pairs("weather", pairs)?;
        let expect = expect
            .iter()
            .map(|(key, value)| (key.to_string(), json!(value)))
            .collect::<BTreeMap<_, _>>();
        assert_eq!(input.params, expect);

        Ok(())
    }

    #[test_case("city"; "missing equals")]
    #[test_case("=Paris"; "missing key")]
    #[test]
    fn run_params_reject_malformed_pairs(pair: &str) {
        use pretty_assertions::assert_eq;
        let result = RunScriptInput::from_pairs("weather", [pair]);
        assert_eq!(result, Err(InvalidParams(pair.to_string())));
    }

    #[test]
    fn schedule_renders_cron_fields() -> anyhow::Result<()> {
        let schedule: Schedule = serde_json::from_value(json!({
            "id": "s1",
            "created_at": "2024-01-01T00:00:00Z",
            "minute": "*/5",
            "hour": "*",
            "day_of_month": "*",
            "month_of_year": "*",
            "day_of_week": "1-5",
        }))?;

        assert_eq!(schedule.cron(), "*/5 * * * 1-5");

        Ok(())
    }
}
