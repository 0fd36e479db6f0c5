//! The packaging service.
//!
//! Deliveries that arrive as a loose set of product files get zipped up
//! here. Besides the complete `<product>.zip`, each configured derived
//! product gets its own `<product>.<name>.zip` holding just the files it
//! lists. Every zip is labelled in the output so that the metadata
//! construction step can pick the right collection for it.

use anyhow::Context;
use lambda_runtime::tracing;
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    io::{Cursor, Write},
};
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::{
    config::Config,
    error::Result,
    ingest::copy_renamed,
    s3objects::{self, OutputLocation, ProductLocations, S3Object, S3ObjectCollection},
};

pub const SECTION: &str = "package";
pub const ALL_LABEL: &str = "all";
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

#[derive(Debug, Deserialize)]
pub struct PackageConfig {
    pub metadata_bucket: String,
    pub browse_bucket: String,
    pub product_bucket: String,
    #[serde(default)]
    pub derived_products: Vec<DerivedProduct>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DerivedProduct {
    pub name: String,
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PackageRequest {
    #[serde(rename = "ProductName")]
    pub product_name: String,

    #[serde(rename = "Metadata")]
    pub metadata: S3Object,

    #[serde(rename = "Browse")]
    pub browse: S3Object,

    #[serde(rename = "ProductFiles")]
    pub product_files: S3ObjectCollection,
}

/// One zip to be written: its label, its object key, and the product file
/// keys that go in it.
#[derive(Clone, Debug, PartialEq)]
pub struct ZipPlan {
    pub label: String,
    pub key: String,
    pub members: Vec<String>,
}

/// Work out which zips to build. Derived products with no files in this
/// delivery are left out.
pub fn plan(product_name: &str, keys: &[String], derived: &[DerivedProduct]) -> Vec<ZipPlan> {
    let mut plans = vec![ZipPlan {
        label: ALL_LABEL.to_owned(),
        key: format!("{}.zip", product_name),
        members: keys.to_vec(),
    }];

    for dp in derived {
        let members: Vec<String> = dp
            .files
            .iter()
            .filter(|f| keys.contains(f))
            .cloned()
            .collect();

        if members.is_empty() {
            tracing::warn!(
                "no files for derived product `{}` of {}; skipping it",
                dp.name,
                product_name
            );
            continue;
        }

        plans.push(ZipPlan {
            label: dp.name.clone(),
            key: format!("{}.{}.zip", product_name, dp.name),
            members,
        });
    }

    plans
}

/// Build a zip in memory. Entries are stored as `<product name>/<key>`.
pub fn build_zip<'a, I>(product_name: &str, files: I) -> anyhow::Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for (key, data) in files {
        let name = format!("{}/{}", product_name, key);
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("failed to start zip entry `{}`", name))?;
        zip.write_all(data)
            .with_context(|| format!("failed to write zip entry `{}`", name))?;
    }

    Ok(zip.finish().context("failed to finish zip archive")?.into_inner())
}

pub async fn handler(
    payload: Option<Value>,
    config: &Config,
    s3: &aws_sdk_s3::Client,
) -> Result<Value> {
    let config: PackageConfig = config.section(SECTION)?;
    let req: PackageRequest = crate::parse_payload(payload)?;
    let name = &req.product_name;

    tracing::info!("processing {}", name);

    let metadata = copy_renamed(s3, &req.metadata, &config.metadata_bucket, name).await?;
    let browse = copy_renamed(s3, &req.browse, &config.browse_bucket, name).await?;

    tracing::info!("downloading product files");
    let mut contents = BTreeMap::new();

    for key in &req.product_files.keys {
        let data = s3objects::get_bytes(s3, &req.product_files.object(key)).await?;
        contents.insert(key.as_str(), data);
    }

    let mut output = BTreeMap::new();

    for zp in plan(name, &req.product_files.keys, &config.derived_products) {
        tracing::info!("creating {}", zp.key);

        let data = build_zip(
            name,
            zp.members
                .iter()
                .filter_map(|k| contents.get(k.as_str()).map(|d| (k.as_str(), d.as_slice()))),
        )?;

        let dest = OutputLocation::new(config.product_bucket.clone(), zp.key);
        s3objects::put(s3, &dest, data, ZIP_CONTENT_TYPE).await?;

        output.insert(
            zp.label,
            ProductLocations {
                product: dest.into(),
                metadata: metadata.clone(),
                browse: browse.clone(),
            },
        );
    }

    tracing::info!("done processing {}", name);
    Ok(serde_json::to_value(output)?)
}
