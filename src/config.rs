//! Deployment configuration.
//!
//! Each Lambda gets a JSON document in its `CONFIG` environment variable. The
//! document holds one section per function, keyed by the function's
//! snake_case name, so a single document can be shared by the whole stack.
//! When the function is invoked through one of the maturity aliases (`DEV`,
//! `TEST`, `PROD`), a `CONFIG_<MATURITY>` variable takes precedence.

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const CONFIG_VAR: &str = "CONFIG";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Maturity {
    Dev,
    Test,
    Prod,
    Latest,
}

impl Maturity {
    /// Determine the maturity from the qualifier at the end of an invoked
    /// function ARN. Unqualified ARNs and numbered versions are `LATEST`.
    pub fn from_arn(arn: &str) -> Self {
        match arn.rsplit(':').next() {
            Some("DEV") => Maturity::Dev,
            Some("TEST") => Maturity::Test,
            Some("PROD") => Maturity::Prod,
            _ => Maturity::Latest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Maturity::Dev => "DEV",
            Maturity::Test => "TEST",
            Maturity::Prod => "PROD",
            Maturity::Latest => "LATEST",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(flatten)]
    sections: Map<String, Value>,
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid JSON: {}", e)))
    }

    /// Load the configuration for the given maturity from the environment.
    ///
    /// A deployment with no configuration at all gets an empty document;
    /// handlers that need a section will then fail with a clear message.
    pub fn load(maturity: Maturity) -> Result<Self> {
        let qualified = format!("{}_{}", CONFIG_VAR, maturity.as_str());

        let text = match maturity {
            Maturity::Latest => std::env::var(CONFIG_VAR).ok(),
            _ => std::env::var(&qualified)
                .or_else(|_| std::env::var(CONFIG_VAR))
                .ok(),
        };

        match text {
            Some(t) => Self::parse(&t),
            None => Ok(Config::default()),
        }
    }

    /// Deserialize one function's section.
    pub fn section<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .sections
            .get(name)
            .ok_or_else(|| Error::Config(format!("no `{}` section in configuration", name)))?;

        T::deserialize(value)
            .map_err(|e| Error::Config(format!("invalid `{}` section: {}", name, e)))
    }

    /// The tracing filter directive equivalent to `log_level`.
    ///
    /// Deployments were historically configured with Python logging level
    /// names, so those are mapped onto tracing's levels.
    pub fn filter_directive(&self) -> &'static str {
        match self
            .log_level
            .as_deref()
            .map(|s| s.to_ascii_uppercase())
            .as_deref()
        {
            Some("TRACE") => "trace",
            Some("DEBUG") => "debug",
            Some("WARN") | Some("WARNING") => "warn",
            Some("ERROR") | Some("CRITICAL") => "error",
            _ => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        bucket: String,
    }

    #[test]
    fn maturity_from_alias() {
        let base = "arn:aws:lambda:us-west-2:123456789012:function:gunw-ingest";
        assert_eq!(Maturity::from_arn(base), Maturity::Latest);
        assert_eq!(Maturity::from_arn(&format!("{base}:PROD")), Maturity::Prod);
        assert_eq!(Maturity::from_arn(&format!("{base}:TEST")), Maturity::Test);
        assert_eq!(Maturity::from_arn(&format!("{base}:DEV")), Maturity::Dev);
        assert_eq!(Maturity::from_arn(&format!("{base}:7")), Maturity::Latest);
    }

    #[test]
    fn sections_are_typed() {
        let config =
            Config::parse(r#"{"log_level": "DEBUG", "ingest": {"bucket": "products"}}"#).unwrap();
        assert_eq!(config.filter_directive(), "debug");

        let sample: Sample = config.section("ingest").unwrap();
        assert_eq!(sample.bucket, "products");

        let missing = config.section::<Sample>("notify").unwrap_err();
        assert_eq!(missing.code(), "CONFIG_ERROR");
        assert!(missing.to_string().contains("`notify`"));
    }

    #[test]
    fn malformed_section_is_config_error() {
        let config = Config::parse(r#"{"ingest": {"bucket": 12}}"#).unwrap();
        let err = config.section::<Sample>("ingest").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn default_level_is_info() {
        assert_eq!(Config::default().filter_directive(), "info");
        let config = Config::parse(r#"{"log_level": "warning"}"#).unwrap();
        assert_eq!(config.filter_directive(), "warn");
    }
}
