//! Submission of granule metadata documents to CMR.
//!
//! CMR ingest is a plain `PUT <granule_url>/<native id>`. Authentication is
//! an `Echo-Token` header whose value is cached in S3 by the `cmr-token`
//! function. Tokens expire, and CMR tells us so with a 401; when that
//! happens we ask the token function for a fresh one and try exactly once
//! more.
//!
//! See <https://cmr.earthdata.nasa.gov/ingest/site/docs/ingest/api.html>.

use async_trait::async_trait;
use aws_sdk_lambda::types::InvocationType;
use lambda_runtime::tracing;
use reqwest::{
    header::{ACCEPT, CONTENT_TYPE},
    StatusCode, Url,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    config::Config,
    error::{Error, Result},
    s3objects::{self, OutputLocation, S3Object},
};

pub const SECTION: &str = "cmr_submit";
pub const TOKEN_HEADER: &str = "Echo-Token";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MetadataFormat {
    Echo10,
    UmmG,
}

impl MetadataFormat {
    pub fn from_key(key: &str) -> Result<Self> {
        if key.ends_with(".echo10") {
            Ok(MetadataFormat::Echo10)
        } else if key.ends_with(".umm.json") || key.ends_with(".umm_json") {
            Ok(MetadataFormat::UmmG)
        } else {
            Err(Error::InvalidMessage(format!(
                "cannot tell the metadata format of `{}`",
                key
            )))
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MetadataFormat::Echo10 => "application/echo10+xml",
            MetadataFormat::UmmG => "application/vnd.nasa.cmr.umm+json;version=1.6.5",
        }
    }
}

/// A metadata document ready to be sent, with its native id pulled out.
#[derive(Clone, Debug)]
pub struct GranuleDocument {
    pub native_id: String,
    pub format: MetadataFormat,
    pub body: Vec<u8>,
}

#[derive(Deserialize)]
struct GranuleHeader {
    #[serde(rename = "GranuleUR")]
    granule_ur: String,
}

#[derive(Deserialize)]
struct IngestResult {
    #[serde(rename = "concept-id")]
    concept_id: String,
}

impl GranuleDocument {
    pub fn parse(key: &str, body: Vec<u8>) -> Result<Self> {
        let format = MetadataFormat::from_key(key)?;

        let header: GranuleHeader = match format {
            MetadataFormat::Echo10 => {
                let text = std::str::from_utf8(&body)
                    .map_err(|e| Error::Parse(format!("`{}` is not UTF-8: {}", key, e)))?;
                quick_xml::de::from_str(text)?
            }
            MetadataFormat::UmmG => serde_json::from_slice(&body)?,
        };

        Ok(GranuleDocument {
            native_id: header.granule_ur,
            format,
            body,
        })
    }
}

pub fn parse_concept_id(response: &str) -> Result<String> {
    let result: IngestResult = quick_xml::de::from_str(response)?;
    Ok(result.concept_id)
}

#[derive(Clone, Debug)]
pub struct CatalogResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait CatalogTransport: Send + Sync {
    async fn put(&self, url: &Url, doc: &GranuleDocument, token: Option<&str>)
        -> Result<CatalogResponse>;
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The token we currently believe in, if any.
    async fn current(&self) -> Result<Option<String>>;

    /// Obtain a new token and make it current.
    async fn refresh(&self) -> Result<Option<String>>;
}

pub fn granule_url(base: &Url, native_id: &str) -> Result<Url> {
    base.join(native_id)
        .map_err(|e| Error::Parse(format!("bad granule URL for `{}`: {}", native_id, e)))
}

/// PUT one document, refreshing the token and resending once on a 401.
/// Returns the CMR concept id.
pub async fn push_granule<C, T>(
    catalog: &C,
    tokens: &T,
    base_url: &Url,
    doc: &GranuleDocument,
) -> Result<String>
where
    C: CatalogTransport + ?Sized,
    T: TokenSource + ?Sized,
{
    let url = granule_url(base_url, &doc.native_id)?;
    let token = tokens.current().await?;
    let mut resp = catalog.put(&url, doc, token.as_deref()).await?;

    if resp.status == StatusCode::UNAUTHORIZED.as_u16() {
        tracing::info!("CMR rejected our token; refreshing");
        let token = tokens.refresh().await?;
        resp = catalog.put(&url, doc, token.as_deref()).await?;
    }

    tracing::info!("CMR response: {}", resp.body);

    if !(200..300).contains(&resp.status) {
        return Err(Error::Catalog {
            status: resp.status,
            body: resp.body,
        });
    }

    parse_concept_id(&resp.body)
}

pub struct HttpCatalog<'a> {
    pub client: &'a reqwest::Client,
}

#[async_trait]
impl<'a> CatalogTransport for HttpCatalog<'a> {
    async fn put(
        &self,
        url: &Url,
        doc: &GranuleDocument,
        token: Option<&str>,
    ) -> Result<CatalogResponse> {
        let mut req = self
            .client
            .put(url.clone())
            .header(CONTENT_TYPE, doc.format.content_type())
            .header(ACCEPT, "application/xml")
            .body(doc.body.clone());

        if let Some(token) = token {
            req = req.header(TOKEN_HEADER, token);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(CatalogResponse { status, body })
    }
}

/// The token cached in S3 by the `cmr-token` function, memoized for the
/// lifetime of the Lambda instance.
pub struct S3TokenCache<'a> {
    pub s3: &'a aws_sdk_s3::Client,
    pub lambda: &'a aws_sdk_lambda::Client,
    pub cache: S3Object,
    pub token_lambda: String,
    pub memo: &'a Mutex<Option<String>>,
}

impl<'a> S3TokenCache<'a> {
    async fn read_cache(&self) -> Option<String> {
        match s3objects::get_text(self.s3, &self.cache).await {
            Ok(t) => Some(t.trim().to_owned()),
            Err(e) => {
                tracing::warn!("could not read cached token from {}: {}", self.cache, e);
                None
            }
        }
    }
}

#[async_trait]
impl<'a> TokenSource for S3TokenCache<'a> {
    async fn current(&self) -> Result<Option<String>> {
        let mut memo = self.memo.lock().await;

        if memo.is_none() {
            *memo = self.read_cache().await;
        }

        Ok(memo.clone())
    }

    async fn refresh(&self) -> Result<Option<String>> {
        let mut memo = self.memo.lock().await;

        let resp = self
            .lambda
            .invoke()
            .function_name(&self.token_lambda)
            .invocation_type(InvocationType::RequestResponse)
            .send()
            .await?;

        if let Some(err) = resp.function_error() {
            return Err(Error::Token(format!(
                "{} reported {}",
                self.token_lambda, err
            )));
        }

        *memo = self.read_cache().await;
        Ok(memo.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitConfig {
    pub granule_url: String,
    pub cached_token: OutputLocation,
    pub cmr_token_lambda: String,
}

pub async fn handler(
    payload: Option<Value>,
    config: &Config,
    s3: &aws_sdk_s3::Client,
    lambda: &aws_sdk_lambda::Client,
    http: &reqwest::Client,
    token_memo: &Mutex<Option<String>>,
) -> Result<Value> {
    let config: SubmitConfig = config.section(SECTION)?;
    let documents: Vec<OutputLocation> = crate::parse_payload(payload)?;

    let base_url = Url::parse(&config.granule_url)
        .map_err(|e| Error::Config(format!("invalid granule_url: {}", e)))?;

    let catalog = HttpCatalog { client: http };
    let tokens = S3TokenCache {
        s3,
        lambda,
        cache: config.cached_token.clone().into(),
        token_lambda: config.cmr_token_lambda.clone(),
        memo: token_memo,
    };

    let mut concept_ids = Vec::with_capacity(documents.len());

    for loc in documents {
        let obj: S3Object = loc.into();
        tracing::info!("submitting {}", obj);
        let doc = GranuleDocument::parse(&obj.key, s3objects::get_bytes(s3, &obj).await?)?;
        concept_ids.push(push_granule(&catalog, &tokens, &base_url, &doc).await?);
    }

    Ok(serde_json::to_value(concept_ids)?)
}
