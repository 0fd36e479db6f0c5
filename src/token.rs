//! The `cmr-token` function: trade our credentials for a fresh CMR token and
//! leave it where `cmr-submit` will look for it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use lambda_runtime::tracing;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::Config,
    error::{Error, Result},
    s3objects::{self, OutputLocation},
};

pub const SECTION: &str = "cmr_token";

#[derive(Debug, Deserialize)]
pub struct TokenConfig {
    pub secret_arn: String,
    pub token_url: String,
    pub cache: OutputLocation,
}

/// The contents of the credential secret.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    Certificate {
        /// Base64-encoded PKCS#12 bundle.
        certificate: String,
        passphrase: String,
    },
    Login {
        username: String,
        password: String,
    },
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "sm_token", alias = "access_token")]
    token: String,
}

pub fn parse_token(status: u16, body: &str) -> Result<String> {
    if !(200..300).contains(&status) {
        return Err(Error::Token(format!("HTTP {}: {}", status, body)));
    }

    let resp: TokenResponse = serde_json::from_str(body)
        .map_err(|e| Error::Token(format!("unexpected token response: {}", e)))?;
    Ok(resp.token)
}

async fn get_credentials(
    secrets: &aws_sdk_secretsmanager::Client,
    secret_arn: &str,
) -> Result<Credentials> {
    let resp = secrets.get_secret_value().secret_id(secret_arn).send().await?;

    let text = resp
        .secret_string()
        .ok_or_else(|| Error::Token(format!("secret {} has no string value", secret_arn)))?;

    serde_json::from_str(text)
        .map_err(|e| Error::Token(format!("secret {} is not a credential: {}", secret_arn, e)))
}

/// Decode a base64 PKCS#12 bundle into a client identity.
fn identity(certificate: &str, passphrase: &str) -> Result<reqwest::Identity> {
    let der = STANDARD
        .decode(certificate.trim())
        .map_err(|e| Error::Token(format!("certificate is not base64: {}", e)))?;
    reqwest::Identity::from_pkcs12_der(&der, passphrase)
        .map_err(|e| Error::Token(format!("unusable certificate bundle: {}", e)))
}

async fn request_token(http: &reqwest::Client, url: &str, creds: Credentials) -> Result<String> {
    let resp = match creds {
        Credentials::Certificate {
            certificate,
            passphrase,
        } => {
            let id = identity(&certificate, &passphrase)?;
            let client = reqwest::Client::builder().identity(id).build()?;
            client.get(url).send().await?
        }

        Credentials::Login { username, password } => {
            http.post(url)
                .basic_auth(username, Some(password))
                .send()
                .await?
        }
    };

    let status = resp.status().as_u16();
    let body = resp.text().await?;
    parse_token(status, &body)
}

pub async fn handler(
    _payload: Option<Value>,
    config: &Config,
    secrets: &aws_sdk_secretsmanager::Client,
    s3: &aws_sdk_s3::Client,
    http: &reqwest::Client,
) -> Result<Value> {
    let config: TokenConfig = config.section(SECTION)?;

    let creds = get_credentials(secrets, &config.secret_arn).await?;
    let token = request_token(http, &config.token_url, creds).await?;
    tracing::info!("obtained new CMR token");

    s3objects::put(s3, &config.cache, token.into_bytes(), "text/plain").await?;
    Ok(Value::Null)
}
