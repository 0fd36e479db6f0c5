//! The verify service: reject bad deliveries before any work is done.
//!
//! The checks run in a fixed order: the message itself, then the response
//! topic (if any), then the existence of every referenced object, and
//! finally the contents of the metadata file. Each failure has its own
//! fault code so that the state machine can route it to `notify`.

use aws_sdk_s3::error::ProvideErrorMetadata;
use jsonschema::JSONSchema;
use lambda_runtime::tracing;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{Error, Result},
    s3objects::{self, S3Object, S3ObjectCollection},
    topic::Topic,
};

pub const MESSAGE_ERROR_KEY: &str = "MessageError";

const JSON_PARSE_ERRORS: &[&str] = &[
    "Invalid parameter: Message Structure - JSON message body failed to parse",
    "Invalid parameter: Message Structure - No default entry in JSON message body",
];

type Compiled = std::result::Result<JSONSchema, String>;

static MESSAGE_SCHEMA: Lazy<Compiled> =
    Lazy::new(|| compile(include_str!("../schemas/message_schema.json")));

static METADATA_SCHEMA: Lazy<Compiled> =
    Lazy::new(|| compile(include_str!("../schemas/metadata_schema.json")));

fn compile(text: &str) -> Compiled {
    let schema: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    JSONSchema::compile(&schema).map_err(|e| e.to_string())
}

/// The first schema violation, if any.
fn first_violation(schema: &'static Lazy<Compiled>, instance: &Value) -> Result<Option<String>> {
    let compiled: &Compiled = schema;
    let schema = compiled
        .as_ref()
        .map_err(|e| Error::Config(format!("embedded schema does not compile: {}", e)))?;

    Ok(match schema.validate(instance) {
        Ok(()) => None,
        Err(mut errors) => errors.next().map(|e| e.to_string()),
    })
}

#[derive(Debug, Deserialize)]
struct Delivery {
    #[serde(rename = "Metadata")]
    metadata: S3Object,

    #[serde(rename = "Browse")]
    browse: S3Object,

    #[serde(rename = "Product", default)]
    product: Option<S3Object>,

    #[serde(rename = "ProductFiles", default)]
    product_files: Option<S3ObjectCollection>,

    #[serde(rename = "ResponseTopic", default)]
    response_topic: Option<Topic>,
}

pub fn validate_message(message: &Value) -> Result<()> {
    if let Some(err) = message.get(MESSAGE_ERROR_KEY) {
        let text = match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(Error::InvalidMessage(text));
    }

    match first_violation(&MESSAGE_SCHEMA, message)? {
        Some(v) => Err(Error::InvalidMessage(v)),
        None => Ok(()),
    }
}

/// Check the contents of an SDS metadata file.
pub fn check_metadata(data: &[u8]) -> Result<()> {
    let metadata: Value =
        serde_json::from_slice(data).map_err(|e| Error::InvalidMetadata(e.to_string()))?;

    match first_violation(&METADATA_SCHEMA, &metadata)? {
        Some(v) => Err(Error::InvalidMetadata(v)),
        None => Ok(()),
    }
}

/// Whether an SNS publish error proves that the topic exists and accepts
/// our messages, and only objected to the deliberately bogus body.
pub fn is_json_parse_error(code: Option<&str>, message: Option<&str>) -> bool {
    code == Some("InvalidParameter")
        && message.map_or(false, |m| JSON_PARSE_ERRORS.contains(&m))
}

pub async fn validate_topic(topic: &Topic, sdk_config: &aws_config::SdkConfig) -> Result<()> {
    let result = topic
        .client(sdk_config)
        .publish()
        .topic_arn(&topic.arn)
        .message("invalidMessage")
        .message_structure("json")
        .send()
        .await;

    match result {
        // Shouldn't happen, but the topic is evidently fine.
        Ok(_) => Ok(()),
        Err(e) if is_json_parse_error(e.code(), e.message()) => Ok(()),
        Err(e) => Err(Error::InvalidTopic(
            aws_sdk_s3::error::DisplayErrorContext(&e).to_string(),
        )),
    }
}

pub async fn validate_s3_object(s3: &aws_sdk_s3::Client, obj: &S3Object) -> Result<()> {
    let result = s3
        .head_object()
        .bucket(&obj.bucket)
        .key(&obj.key)
        .send()
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            let status = e.raw_response().map(|r| r.status().as_u16());

            if matches!(status, Some(403) | Some(404)) {
                Err(Error::MissingFile(format!(
                    "{} {}",
                    obj,
                    aws_sdk_s3::error::DisplayErrorContext(&e)
                )))
            } else {
                Err(e.into())
            }
        }
    }
}

pub async fn validate_metadata(s3: &aws_sdk_s3::Client, obj: &S3Object) -> Result<()> {
    let data = s3objects::get_bytes(s3, obj).await?;
    check_metadata(&data)
}

pub async fn handler(
    payload: Option<Value>,
    s3: &aws_sdk_s3::Client,
    sdk_config: &aws_config::SdkConfig,
) -> Result<Value> {
    let message = payload.unwrap_or(Value::Null);
    tracing::debug!("verifying {}", message);

    validate_message(&message)?;
    let delivery: Delivery =
        serde_json::from_value(message).map_err(|e| Error::InvalidMessage(e.to_string()))?;

    if let Some(topic) = &delivery.response_topic {
        validate_topic(topic, sdk_config).await?;
    }

    validate_s3_object(s3, &delivery.metadata).await?;
    validate_s3_object(s3, &delivery.browse).await?;

    if let Some(product) = &delivery.product {
        validate_s3_object(s3, product).await?;
    }

    if let Some(files) = &delivery.product_files {
        for obj in files.objects() {
            validate_s3_object(s3, &obj).await?;
        }
    }

    validate_metadata(s3, &delivery.metadata).await?;
    tracing::info!("verified delivery with metadata {}", delivery.metadata);
    Ok(Value::Null)
}
