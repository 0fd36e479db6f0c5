//! The ingest service: copy a delivered product's files into our own
//! buckets, renamed after the product.

use lambda_runtime::tracing;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::Config,
    error::Result,
    s3objects::{self, ProductLocations, S3Object},
};

pub const SECTION: &str = "ingest";

#[derive(Debug, Deserialize)]
pub struct IngestConfig {
    pub metadata_bucket: String,
    pub browse_bucket: String,
    pub product_bucket: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(rename = "ProductName")]
    pub product_name: String,

    #[serde(rename = "Metadata")]
    pub metadata: S3Object,

    #[serde(rename = "Browse")]
    pub browse: S3Object,

    #[serde(rename = "Product")]
    pub product: S3Object,
}

/// Where a delivered file ends up: `<bucket>/<product name><extension>`.
pub fn destination(source: &S3Object, bucket: &str, product_name: &str) -> S3Object {
    S3Object::new(
        bucket,
        format!("{}{}", product_name, s3objects::extension(&source.key)),
    )
}

pub async fn copy_renamed(
    s3: &aws_sdk_s3::Client,
    source: &S3Object,
    bucket: &str,
    product_name: &str,
) -> Result<S3Object> {
    let dest = destination(source, bucket, product_name);
    s3objects::copy(s3, source, &dest).await?;
    Ok(dest)
}

pub async fn handler(
    payload: Option<Value>,
    config: &Config,
    s3: &aws_sdk_s3::Client,
) -> Result<Value> {
    let config: IngestConfig = config.section(SECTION)?;
    let req: IngestRequest = crate::parse_payload(payload)?;

    tracing::info!("processing {}", req.product_name);

    let metadata = copy_renamed(s3, &req.metadata, &config.metadata_bucket, &req.product_name).await?;
    let browse = copy_renamed(s3, &req.browse, &config.browse_bucket, &req.product_name).await?;
    let product = copy_renamed(s3, &req.product, &config.product_bucket, &req.product_name).await?;

    tracing::info!("done processing {}", req.product_name);

    Ok(serde_json::to_value(ProductLocations {
        product,
        metadata,
        browse,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destinations_take_the_product_name() {
        let src = S3Object::new("delivery", "incoming/2024/granule_v3.json");
        assert_eq!(
            destination(&src, "metadata", "S1-GUNW-X"),
            S3Object::new("metadata", "S1-GUNW-X.json")
        );

        let src = S3Object::new("delivery", "incoming/granule");
        assert_eq!(destination(&src, "products", "S1-GUNW-X").key, "S1-GUNW-X");
    }

    #[test]
    fn request_shape() {
        let req: IngestRequest = serde_json::from_str(
            r#"{"ProductName": "P", "DeliveryTime": "t",
                "Metadata": {"Bucket": "d", "Key": "p.json"},
                "Browse": {"Bucket": "d", "Key": "p.png"},
                "Product": {"Bucket": "d", "Key": "p.nc"}}"#,
        )
        .unwrap();
        assert_eq!(req.product_name, "P");
        assert_eq!(req.product.key, "p.nc");
    }
}
