//! Errors surfaced to the Step Functions orchestrator.
//!
//! Every handler failure ends up here. The Lambda runtime reports
//! `error_type` verbatim, and the state machine's catch rules (and the notify
//! function's list of known codes) match on it. The named fault variants must
//! therefore keep their codes stable.

use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use lambda_runtime::Diagnostic;
use std::fmt::Debug;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    InvalidMessage(String),

    #[error("{0}")]
    MissingFile(String),

    #[error("{0}")]
    InvalidMetadata(String),

    #[error("{0}")]
    InvalidTopic(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("CMR responded with HTTP {status}: {body}")]
    Catalog { status: u16, body: String },

    #[error("token request failed: {0}")]
    Token(String),

    #[error("AWS request failed: {0}")]
    Aws(String),

    #[error("failed to read object body: {0}")]
    Body(#[from] aws_sdk_s3::primitives::ByteStreamError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("malformed XML document: {0}")]
    Xml(#[from] quick_xml::de::DeError),

    #[error("{0}")]
    Parse(String),

    #[error(transparent)]
    Render(#[from] askama::Error),

    #[error(transparent)]
    Package(#[from] anyhow::Error),

    #[error("unhandled function: {0}")]
    UnknownFunction(String),
}

impl Error {
    /// The fault code reported to the orchestrator.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidMessage(_) => "INVALID_MESSAGE",
            Error::MissingFile(_) => "MISSING_FILE",
            Error::InvalidMetadata(_) => "INVALID_METADATA",
            Error::InvalidTopic(_) => "INVALID_TOPIC",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Catalog { .. } => "CATALOG_ERROR",
            Error::Token(_) => "TOKEN_ERROR",
            Error::Aws(_) | Error::Body(_) => "AWS_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Json(_) | Error::Xml(_) | Error::Parse(_) => "PARSE_ERROR",
            Error::Render(_) => "RENDER_ERROR",
            Error::Package(_) => "PACKAGE_ERROR",
            Error::UnknownFunction(_) => "UNKNOWN_FUNCTION",
        }
    }
}

// All of the service crates share the smithy error types, so this one impl
// covers S3, SNS, SFN, Lambda, CloudWatch and Secrets Manager.
impl<E, R> From<SdkError<E, R>> for Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    fn from(err: SdkError<E, R>) -> Self {
        Error::Aws(DisplayErrorContext(&err).to_string())
    }
}

impl From<Error> for Diagnostic {
    fn from(err: Error) -> Diagnostic {
        Diagnostic {
            error_type: err.code().to_owned(),
            error_message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_faults_keep_their_codes() {
        let d: Diagnostic = Error::MissingFile("s3://b/k missing".into()).into();
        assert_eq!(d.error_type, "MISSING_FILE");
        assert_eq!(d.error_message, "s3://b/k missing");

        assert_eq!(Error::InvalidMessage(String::new()).code(), "INVALID_MESSAGE");
        assert_eq!(Error::InvalidMetadata(String::new()).code(), "INVALID_METADATA");
        assert_eq!(Error::InvalidTopic(String::new()).code(), "INVALID_TOPIC");
    }

    #[test]
    fn catalog_error_mentions_status() {
        let err = Error::Catalog {
            status: 422,
            body: "<errors/>".into(),
        };
        assert_eq!(err.code(), "CATALOG_ERROR");
        assert!(err.to_string().contains("422"));
    }
}
