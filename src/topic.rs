//! SNS topics named in pipeline messages.
//!
//! A response topic may live in any region, so publishing to one means
//! building an SNS client for that region on the spot.

use aws_sdk_sns::config::Region;
use lambda_runtime::tracing;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Topic {
    #[serde(rename = "Arn")]
    pub arn: String,

    #[serde(rename = "Region")]
    pub region: String,
}

impl Topic {
    pub fn client(&self, sdk_config: &aws_config::SdkConfig) -> aws_sdk_sns::Client {
        let conf = aws_sdk_sns::config::Builder::from(sdk_config)
            .region(Region::new(self.region.clone()))
            .build();
        aws_sdk_sns::Client::from_conf(conf)
    }

    /// Publish a plain message; returns the SNS message id.
    pub async fn publish(&self, sdk_config: &aws_config::SdkConfig, message: &str) -> Result<String> {
        tracing::debug!("SNS message to {}: {}", self.arn, message);

        let resp = self
            .client(sdk_config)
            .publish()
            .topic_arn(&self.arn)
            .message(message)
            .send()
            .await?;

        let id = resp.message_id().unwrap_or_default().to_owned();
        tracing::info!("SNS message id: {}", id);
        Ok(id)
    }
}
