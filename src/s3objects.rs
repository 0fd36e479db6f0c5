//! S3 object references as they appear in pipeline messages, and the handful
//! of S3 calls the handlers make with them.
//!
//! Messages from the delivery side use `{"Bucket": ..., "Key": ...}`, while
//! the metadata construction functions have always returned lowercase
//! `{"bucket": ..., "key": ...}` locations. Both shapes are kept so that the
//! state machine definitions don't need to change.

use aws_sdk_s3::{
    primitives::ByteStream,
    types::{MetadataDirective, TaggingDirective},
};
use lambda_runtime::tracing;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct S3Object {
    #[serde(rename = "Bucket")]
    pub bucket: String,

    #[serde(rename = "Key")]
    pub key: String,
}

impl S3Object {
    pub fn new<B: Into<String>, K: Into<String>>(bucket: B, key: K) -> Self {
        S3Object {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for S3Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OutputLocation {
    pub bucket: String,
    pub key: String,
}

impl OutputLocation {
    pub fn new<B: Into<String>, K: Into<String>>(bucket: B, key: K) -> Self {
        OutputLocation {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl From<OutputLocation> for S3Object {
    fn from(loc: OutputLocation) -> Self {
        S3Object {
            bucket: loc.bucket,
            key: loc.key,
        }
    }
}

/// The three files that make up one deliverable granule.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProductLocations {
    #[serde(rename = "Product")]
    pub product: S3Object,

    #[serde(rename = "Metadata")]
    pub metadata: S3Object,

    #[serde(rename = "Browse")]
    pub browse: S3Object,
}

/// A set of product files sharing a bucket and an optional key prefix.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct S3ObjectCollection {
    #[serde(rename = "Bucket")]
    pub bucket: String,

    #[serde(rename = "Prefix", default)]
    pub prefix: String,

    #[serde(rename = "Keys")]
    pub keys: Vec<String>,
}

impl S3ObjectCollection {
    pub fn object(&self, key: &str) -> S3Object {
        S3Object::new(self.bucket.clone(), join_key(&self.prefix, key))
    }

    pub fn objects(&self) -> impl Iterator<Item = S3Object> + '_ {
        self.keys.iter().map(|k| self.object(k))
    }
}

/// Join a prefix and a key the way a path join would: no doubled slash, and
/// an empty prefix is a no-op.
pub fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() || key.starts_with('/') {
        key.to_owned()
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, key)
    } else {
        format!("{}/{}", prefix, key)
    }
}

/// The extension of the last path component of `key`, including the dot.
///
/// Leading dots of a dotfile don't count, so `.hidden` has no extension.
pub fn extension(key: &str) -> &str {
    let name = match key.rfind('/') {
        Some(i) => &key[i + 1..],
        None => key,
    };

    match name.rfind('.') {
        Some(i) if name[..i].chars().any(|c| c != '.') => &name[i..],
        _ => "",
    }
}

pub fn content_type_for(key: &str) -> &'static str {
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

pub async fn get_bytes(s3: &aws_sdk_s3::Client, obj: &S3Object) -> Result<Vec<u8>> {
    let resp = s3
        .get_object()
        .bucket(&obj.bucket)
        .key(&obj.key)
        .send()
        .await?;
    let data = resp.body.collect().await?;
    Ok(data.into_bytes().to_vec())
}

pub async fn get_text(s3: &aws_sdk_s3::Client, obj: &S3Object) -> Result<String> {
    let bytes = get_bytes(s3, obj).await?;
    String::from_utf8(bytes).map_err(|e| Error::Parse(format!("{} is not UTF-8 text: {}", obj, e)))
}

pub async fn size(s3: &aws_sdk_s3::Client, obj: &S3Object) -> Result<u64> {
    let resp = s3
        .head_object()
        .bucket(&obj.bucket)
        .key(&obj.key)
        .send()
        .await?;

    let n = resp
        .content_length()
        .ok_or_else(|| Error::Aws(format!("no content length reported for {}", obj)))?;
    Ok(n.max(0) as u64)
}

pub async fn put(
    s3: &aws_sdk_s3::Client,
    dest: &OutputLocation,
    body: Vec<u8>,
    content_type: &str,
) -> Result<()> {
    tracing::info!("uploading s3://{}/{}", dest.bucket, dest.key);
    s3.put_object()
        .bucket(&dest.bucket)
        .key(&dest.key)
        .content_type(content_type)
        .body(ByteStream::from(body))
        .send()
        .await?;
    Ok(())
}

/// The `x-amz-copy-source` value for an object: the bucket and the
/// URL-encoded key, with the key's `/` separators left alone.
pub fn copy_source(obj: &S3Object) -> String {
    let key: Vec<_> = obj.key.split('/').map(urlencoding::encode).collect();
    format!("{}/{}", obj.bucket, key.join("/"))
}

/// Server-side copy with the content type re-derived from the destination
/// key. Source metadata and tags are not carried over.
pub async fn copy(s3: &aws_sdk_s3::Client, source: &S3Object, dest: &S3Object) -> Result<()> {
    tracing::info!("copying {} to {}", source, dest);
    s3.copy_object()
        .copy_source(copy_source(source))
        .bucket(&dest.bucket)
        .key(&dest.key)
        .content_type(content_type_for(&dest.key))
        .metadata_directive(MetadataDirective::Replace)
        .tagging_directive(TaggingDirective::Replace)
        .send()
        .await?;
    Ok(())
}
