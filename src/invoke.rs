//! The invoke service: turn queued delivery notifications into workflow
//! executions.
//!
//! The function is fed by an SQS event source. Each record body is the SNS
//! envelope of a delivery message. A message that isn't valid JSON still
//! starts an execution, carrying an error entry in place of the message, so
//! that the workflow's verify step can report it back to the sender.
//! Records we couldn't hand off are returned as batch item failures and
//! stay on the queue; everything else is deleted by the event source.

use async_trait::async_trait;
use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse, SqsEvent, SqsMessage};
use lambda_runtime::tracing;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    config::Config,
    error::{Error, Result},
    verify::MESSAGE_ERROR_KEY,
};

pub const SECTION: &str = "invoke";

#[derive(Debug, Deserialize)]
pub struct InvokeConfig {
    pub step_function_arn: String,
    #[serde(default = "default_message_error_key")]
    pub message_error_key: String,
}

fn default_message_error_key() -> String {
    MESSAGE_ERROR_KEY.to_owned()
}

#[derive(Debug, Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Message")]
    message: String,
}

#[async_trait]
pub trait ExecutionStarter: Send + Sync {
    /// Start an execution with the given input, returning its ARN.
    async fn start(&self, input: String) -> Result<String>;
}

pub struct StepFunction<'a> {
    pub sfn: &'a aws_sdk_sfn::Client,
    pub state_machine_arn: &'a str,
}

#[async_trait]
impl<'a> ExecutionStarter for StepFunction<'a> {
    async fn start(&self, input: String) -> Result<String> {
        let resp = self
            .sfn
            .start_execution()
            .state_machine_arn(self.state_machine_arn)
            .input(input)
            .send()
            .await?;
        Ok(resp.execution_arn().to_owned())
    }
}

/// Pass a JSON message through untouched; replace anything else with an
/// error object.
pub fn validate_message(message: &str, message_error_key: &str) -> String {
    tracing::debug!("message: {}", message);

    match serde_json::from_str::<Value>(message) {
        Ok(_) => message.to_owned(),
        Err(e) => {
            tracing::warn!("message is not JSON: {}", e);
            json!({ message_error_key: e.to_string() }).to_string()
        }
    }
}

async fn process_record<S: ExecutionStarter + ?Sized>(
    record: &SqsMessage,
    message_error_key: &str,
    starter: &S,
) -> Result<String> {
    let body = record
        .body
        .as_deref()
        .ok_or_else(|| Error::InvalidMessage("SQS record has no body".to_owned()))?;

    let envelope: SnsEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::InvalidMessage(format!("record is not an SNS envelope: {}", e)))?;

    let input = validate_message(&envelope.message, message_error_key);
    starter.start(input).await
}

pub async fn process_records<S: ExecutionStarter + ?Sized>(
    records: &[SqsMessage],
    message_error_key: &str,
    starter: &S,
) -> SqsBatchResponse {
    let mut failures = Vec::new();

    for record in records {
        let id = record.message_id.clone().unwrap_or_default();

        match process_record(record, message_error_key, starter).await {
            Ok(arn) => tracing::info!("execution started: {}", arn),
            Err(e) => {
                tracing::error!("record {} not handed off ({}): {}", id, e.code(), e);
                failures.push(BatchItemFailure {
                    item_identifier: id,
                });
            }
        }
    }

    SqsBatchResponse {
        batch_item_failures: failures,
    }
}

pub async fn handler(
    payload: Option<Value>,
    config: &Config,
    sfn: &aws_sdk_sfn::Client,
) -> Result<Value> {
    let config: InvokeConfig = config.section(SECTION)?;
    let event: SqsEvent = crate::parse_payload(payload)?;

    let starter = StepFunction {
        sfn,
        state_machine_arn: &config.step_function_arn,
    };

    let response = process_records(&event.records, &config.message_error_key, &starter).await;
    Ok(serde_json::to_value(response)?)
}
