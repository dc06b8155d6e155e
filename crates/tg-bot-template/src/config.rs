use crate::observability::{Level, LoggerConfig};
use crate::prelude::*;
use crate::{tg, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable with the bot token
pub const BOT_TOKEN_VAR: &str = "BOT_TOKEN";

#[derive(Debug)]
pub struct Config {
    pub tg: tg::Config,
    pub logging: LoggerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Couldn't load config from environment variables with prefix {prefix}")]
    Env {
        prefix: &'static str,
        source: envy::Error,
    },

    #[error("{var} is required")]
    MissingRequired { var: &'static str },
}

/// Shape of the `BOT_*` variables
#[derive(Deserialize)]
struct BotEnv {
    token: Option<String>,
}

/// Shape of the `LOG_*` variables. All values are kept as strings, since
/// the logger is lenient about them.
#[derive(Deserialize)]
struct LoggingEnv {
    level: Option<String>,
    output: Option<String>,
    file: Option<PathBuf>,
    json: Option<String>,
}

impl Config {
    /// Reads the config from the process environment
    pub fn load() -> Result<Config> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Config> {
        let vars: Vec<_> = vars.into_iter().collect();

        let bot: BotEnv = from_vars("BOT_", &vars)?;

        let Some(token) = bot.token.filter(|token| !token.is_empty()) else {
            return Err(err!(ConfigError::MissingRequired { var: BOT_TOKEN_VAR }));
        };

        let logging: LoggingEnv = from_vars("LOG_", &vars)?;

        Ok(Config {
            tg: tg::Config { token },
            logging: logging.into_logger_config(),
        })
    }
}

impl LoggingEnv {
    fn into_logger_config(self) -> LoggerConfig {
        let non_empty = |value: Option<String>| value.filter(|value| !value.is_empty());

        let level = non_empty(self.level).unwrap_or_else(|| Level::default().to_string());
        let output = non_empty(self.output).unwrap_or_else(|| "stdout".to_owned());

        LoggerConfig {
            add_source: Level::parse_lenient(&level) == Level::Debug,
            level,
            output,
            file: self.file.filter(|file| !file.as_os_str().is_empty()),
            json: self.json.as_deref() == Some("true"),
            writer: None,
        }
    }
}

fn from_vars<T: DeserializeOwned>(prefix: &'static str, vars: &[(String, String)]) -> Result<T> {
    let result = envy::prefixed(prefix).from_iter(vars.iter().cloned());
    result.map_err(err_ctx!(ConfigError::Env { prefix }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use assert_matches::assert_matches;
    use expect_test::{expect, Expect};

    fn vars(vars: &[(&str, &str)]) -> Vec<(String, String)> {
        vars.iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[track_caller]
    fn assert_logging(input: &[(&str, &str)], expected: Expect) {
        let mut input = vars(input);
        input.push(("BOT_TOKEN".to_owned(), "test_token".to_owned()));

        let config = Config::from_vars(input).unwrap();
        assert_eq!(config.tg.token, "test_token");

        expected.assert_eq(&format!("{:#?}", config.logging));
    }

    #[test]
    fn default_values() {
        assert_logging(
            &[("UNRELATED", "value")],
            expect![[r#"
                LoggerConfig {
                    level: "info",
                    output: "stdout",
                    file: None,
                    json: false,
                    add_source: false,
                }"#]],
        );
    }

    #[test]
    fn empty_values_are_defaults() {
        assert_logging(
            &[("LOG_LEVEL", ""), ("LOG_OUTPUT", ""), ("LOG_FILE", "")],
            expect![[r#"
                LoggerConfig {
                    level: "info",
                    output: "stdout",
                    file: None,
                    json: false,
                    add_source: false,
                }"#]],
        );
    }

    #[test]
    fn custom_values() {
        assert_logging(
            &[
                ("LOG_LEVEL", "debug"),
                ("LOG_OUTPUT", "file"),
                ("LOG_FILE", "app.log"),
                ("LOG_JSON", "true"),
            ],
            expect![[r#"
                LoggerConfig {
                    level: "debug",
                    output: "file",
                    file: Some(
                        "app.log",
                    ),
                    json: true,
                    add_source: true,
                }"#]],
        );
    }

    #[test]
    fn json_flag_requires_exact_true() {
        for value in ["1", "yes", "TRUE", "false", ""] {
            let config = Config::from_vars(vars(&[("BOT_TOKEN", "t"), ("LOG_JSON", value)]))
                .unwrap();
            assert!(!config.logging.json, "{value}");
        }
    }

    #[track_caller]
    fn assert_missing_token(input: &[(&str, &str)]) {
        let err = Config::from_vars(vars(input)).unwrap_err();
        assert_matches!(
            err.kind(),
            ErrorKind::Config {
                source: ConfigError::MissingRequired { var: "BOT_TOKEN" }
            }
        );
        expect!["BOT_TOKEN is required"].assert_eq(&err.kind().to_string());
    }

    #[test]
    fn missing_token() {
        assert_missing_token(&[("LOG_LEVEL", "debug")]);
        assert_missing_token(&[("BOT_TOKEN", "")]);
        assert_missing_token(&[]);
    }
}
