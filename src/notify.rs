//! The notify service: tell the delivering party how their product fared.

use async_trait::async_trait;
use lambda_runtime::tracing;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{config::Config, error::Result, topic::Topic};

pub const SECTION: &str = "notify";
pub const SUCCESS: &str = "success";
pub const FAILURE: &str = "failure";

#[derive(Debug, Deserialize)]
pub struct NotifyConfig {
    pub errors: ErrorConfig,
    pub default_topic: Topic,
}

#[derive(Debug, Deserialize)]
pub struct ErrorConfig {
    /// The event key under which the state machine stores a caught error.
    pub key: String,
    /// Error codes passed on verbatim; any other is reported as `default_code`.
    pub codes: Vec<String>,
    pub default_code: String,
}

#[derive(Debug, Deserialize)]
struct CaughtError {
    #[serde(rename = "Error")]
    error: String,

    #[serde(rename = "Cause", default)]
    cause: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    pub product_name: String,
    pub delivery_time: String,
    pub status: String,
    pub ingest_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// The Lambda runtime stores the failing function's error as JSON in the
/// `Cause`; other states store plain text.
fn cause_message(cause: &str) -> String {
    serde_json::from_str::<Value>(cause)
        .ok()
        .and_then(|v| v.get("errorMessage").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| cause.to_owned())
}

fn str_field(event: &Value, key: &str) -> String {
    event
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

pub fn create_response(event: &Value, errors: &ErrorConfig, now: &str) -> Notification {
    let mut note = Notification {
        product_name: str_field(event, "ProductName"),
        delivery_time: str_field(event, "DeliveryTime"),
        status: SUCCESS.to_owned(),
        ingest_time: now.to_owned(),
        error_code: None,
        error_message: None,
    };

    let caught = event
        .get(&errors.key)
        .filter(|v| !v.is_null())
        .map(|v| serde_json::from_value::<CaughtError>(v.clone()));

    match caught {
        None => {}

        Some(Ok(err)) => {
            note.status = FAILURE.to_owned();
            note.error_code = Some(if errors.codes.contains(&err.error) {
                err.error
            } else {
                errors.default_code.clone()
            });
            note.error_message = Some(cause_message(&err.cause));
        }

        Some(Err(e)) => {
            tracing::warn!("unrecognized error entry in event: {}", e);
            note.status = FAILURE.to_owned();
            note.error_code = Some(errors.default_code.clone());
            note.error_message = Some(event[&errors.key].to_string());
        }
    }

    note
}

pub fn now() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &Topic, message: &str) -> Result<String>;
}

pub struct SnsPublisher<'a> {
    pub sdk_config: &'a aws_config::SdkConfig,
}

#[async_trait]
impl<'a> Publisher for SnsPublisher<'a> {
    async fn publish(&self, topic: &Topic, message: &str) -> Result<String> {
        topic.publish(self.sdk_config, message).await
    }
}

/// Send to the response topic if there is one, falling back to the default
/// topic if there isn't or if that fails.
pub async fn send<P: Publisher + ?Sized>(
    publisher: &P,
    message: &str,
    response_topic: Option<&Topic>,
    default_topic: &Topic,
) -> Result<String> {
    if let Some(topic) = response_topic {
        tracing::info!("sending message to response topic {}", topic.arn);

        match publisher.publish(topic, message).await {
            Ok(id) => return Ok(id),
            Err(e) => tracing::error!("failed to send message to response topic: {}", e),
        }
    }

    tracing::info!("sending message to default topic {}", default_topic.arn);
    publisher.publish(default_topic, message).await
}

pub async fn handler(
    payload: Option<Value>,
    config: &Config,
    sdk_config: &aws_config::SdkConfig,
) -> Result<Value> {
    let config: NotifyConfig = config.section(SECTION)?;
    let event = payload.unwrap_or(Value::Null);

    let note = create_response(&event, &config.errors, &now());

    let response_topic: Option<Topic> = match event.get("ResponseTopic") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!("ignoring malformed ResponseTopic: {}", e);
                None
            }
        },
        None => None,
    };

    let message = serde_json::to_string(&note)?;
    let publisher = SnsPublisher { sdk_config };
    send(&publisher, &message, response_topic.as_ref(), &config.default_topic).await?;

    Ok(serde_json::to_value(note)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;
    use std::sync::Mutex;

    fn errors() -> ErrorConfig {
        ErrorConfig {
            key: "ErrorInfo".into(),
            codes: vec!["INVALID_MESSAGE".into(), "MISSING_FILE".into()],
            default_code: "INTERNAL_ERROR".into(),
        }
    }

    fn topic(arn: &str) -> Topic {
        Topic {
            arn: arn.into(),
            region: "us-west-2".into(),
        }
    }

    #[test]
    fn success() {
        let note = create_response(
            &json!({"ProductName": "P", "DeliveryTime": "2024-01-01T00:00:00Z"}),
            &errors(),
            "2024-01-01T01:02:03.000004",
        );

        assert_eq!(note.status, "success");
        assert_eq!(
            serde_json::to_value(&note).unwrap(),
            json!({
                "ProductName": "P",
                "DeliveryTime": "2024-01-01T00:00:00Z",
                "Status": "success",
                "IngestTime": "2024-01-01T01:02:03.000004"
            })
        );
    }

    #[test]
    fn known_error_code() {
        let event = json!({
            "ProductName": "P",
            "ErrorInfo": {
                "Error": "MISSING_FILE",
                "Cause": "{\"errorMessage\": \"s3://b/k not found\", \"errorType\": \"MISSING_FILE\"}"
            }
        });
        let note = create_response(&event, &errors(), "now");

        assert_eq!(note.status, "failure");
        assert_eq!(note.error_code.as_deref(), Some("MISSING_FILE"));
        assert_eq!(note.error_message.as_deref(), Some("s3://b/k not found"));
        assert_eq!(note.delivery_time, "");
    }

    #[test]
    fn unknown_error_code() {
        let event = json!({"ErrorInfo": {"Error": "States.Timeout", "Cause": "took too long"}});
        let note = create_response(&event, &errors(), "now");

        assert_eq!(note.error_code.as_deref(), Some("INTERNAL_ERROR"));
        assert_eq!(note.error_message.as_deref(), Some("took too long"));
    }

    #[test]
    fn timestamp_has_microseconds() {
        let t = now();
        assert_eq!(t.len(), "2024-01-01T01:02:03.000004".len());
        assert!(chrono::NaiveDateTime::parse_from_str(&t, "%Y-%m-%dT%H:%M:%S%.6f").is_ok());
    }

    struct FakePublisher {
        broken: &'static str,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(&self, topic: &Topic, _message: &str) -> Result<String> {
            if topic.arn == self.broken {
                return Err(Error::Aws("AuthorizationError".into()));
            }
            self.sent.lock().unwrap().push(topic.arn.clone());
            Ok("msg-1".into())
        }
    }

    #[tokio::test]
    async fn falls_back_to_default_topic() {
        let publisher = FakePublisher {
            broken: "arn:response",
            sent: Mutex::new(Vec::new()),
        };

        send(&publisher, "{}", Some(&topic("arn:response")), &topic("arn:default"))
            .await
            .unwrap();
        send(&publisher, "{}", Some(&topic("arn:other")), &topic("arn:default"))
            .await
            .unwrap();
        send(&publisher, "{}", None, &topic("arn:default")).await.unwrap();

        assert_eq!(
            *publisher.sent.lock().unwrap(),
            vec!["arn:default", "arn:other", "arn:default"]
        );
    }
}
