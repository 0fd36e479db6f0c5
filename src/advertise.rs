//! The advertise service: announce a newly catalogued granule by publishing
//! its CMR record.

use lambda_runtime::tracing;
use reqwest::{header::ACCEPT, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::Config,
    error::{Error, Result},
};

pub const SECTION: &str = "advertise";

#[derive(Debug, Deserialize)]
pub struct AdvertiseConfig {
    pub concept_search_url: String,
    pub cmr_client_id: String,
    pub topic_arn: String,
}

#[derive(Debug, Deserialize)]
pub struct AdvertiseRequest {
    pub granule_concept_id: String,
}

#[derive(Debug, Serialize)]
pub struct AdvertiseResponse {
    pub message_id: String,
}

pub fn concept_url(base: &str, concept_id: &str) -> Result<Url> {
    Url::parse(base)
        .and_then(|u| u.join(concept_id))
        .map_err(|e| Error::Config(format!("invalid concept_search_url `{}`: {}", base, e)))
}

async fn get_cmr_metadata(http: &reqwest::Client, url: Url, client_id: &str) -> Result<String> {
    let resp = http
        .get(url)
        .header("Client-Id", client_id)
        .header(ACCEPT, "application/json")
        .send()
        .await?
        .error_for_status()?;
    Ok(resp.text().await?)
}

pub async fn handler(
    payload: Option<Value>,
    config: &Config,
    http: &reqwest::Client,
    sns: &aws_sdk_sns::Client,
) -> Result<Value> {
    let config: AdvertiseConfig = config.section(SECTION)?;
    let req: AdvertiseRequest = crate::parse_payload(payload)?;

    tracing::info!("advertising {}", req.granule_concept_id);

    let url = concept_url(&config.concept_search_url, &req.granule_concept_id)?;
    let message = get_cmr_metadata(http, url, &config.cmr_client_id).await?;

    let resp = sns
        .publish()
        .topic_arn(&config.topic_arn)
        .message(message)
        .send()
        .await?;

    Ok(serde_json::to_value(AdvertiseResponse {
        message_id: resp.message_id().unwrap_or_default().to_owned(),
    })?)
}
