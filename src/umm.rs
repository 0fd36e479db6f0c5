//! The UMM-G metadata construction service.

use lambda_runtime::tracing;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{
    config::Config,
    echo10,
    error::Result,
    granule::{unique_platforms, value_strings, SdsMetadata},
    s3objects::{self, OutputLocation, ProductLocations, S3Object},
};

pub const SECTION: &str = "metadata_construction";
pub const UMM_VERSION: &str = "1.6.5";
pub const CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Deserialize)]
pub struct UmmConfig {
    pub output_bucket: String,
    pub granule_data: UrlPaths,
    #[serde(default)]
    pub collection: CollectionReference,
}

#[derive(Debug, Deserialize)]
pub struct UrlPaths {
    pub download_path: String,
    pub browse_path: String,
}

#[derive(Debug, Deserialize)]
pub struct CollectionReference {
    #[serde(default = "default_short_name")]
    pub short_name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_short_name() -> String {
    "ARIA_S1_GUNW".to_owned()
}

fn default_version() -> String {
    "1".to_owned()
}

impl Default for CollectionReference {
    fn default() -> Self {
        CollectionReference {
            short_name: default_short_name(),
            version: default_version(),
        }
    }
}

fn attribute(name: &str, values: Vec<String>) -> Value {
    json!({"Name": name, "Values": values})
}

/// Recursively rebuild every object with its keys in sorted order.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

pub fn render_granule_metadata(
    sds: &SdsMetadata,
    config: &UmmConfig,
    product: &S3Object,
    file_size: u64,
    now: &str,
) -> Result<Value> {
    let md = &sds.metadata;
    let granule_ur = &sds.label;

    let points: Vec<Value> = sds
        .exterior_ring()?
        .iter()
        .rev()
        .map(|p| json!({"Latitude": p.lat, "Longitude": p.lon}))
        .collect();

    let mut attributes = vec![
        attribute("ASCENDING_DESCENDING", vec![md.orbit_direction.clone()]),
        attribute("BEAM_MODE", vec![md.beam_mode.clone()]),
        attribute("POLARIZATION", vec![md.polarization().to_owned()]),
        attribute(
            "PERPENDICULAR_BASELINE",
            vec![md.perpendicular_baseline.to_string()],
        ),
    ];

    if let Some(v) = &md.version {
        attributes.push(attribute("VERSION", value_strings(v)));
    }

    if let Some(n) = &md.frame_number {
        attributes.push(attribute("FRAME_NUMBER", vec![n.to_string()]));
    }

    attributes.push(attribute("PATH_NUMBER", vec![md.track_number.to_string()]));

    if let Some(n) = &md.temporal_baseline_days {
        attributes.push(attribute("TEMPORAL_BASELINE_DAYS", vec![n.to_string()]));
    }

    if let Some(v) = &md.weather_model {
        attributes.push(attribute("WEATHER_MODEL", value_strings(v)));
    }

    let platforms: Vec<Value> = unique_platforms(&md.platform, false)
        .into_iter()
        .map(|p| json!({"ShortName": p}))
        .collect();

    let orbits: Vec<Value> = md
        .orbit_number
        .iter()
        .map(|o| json!({"OrbitNumber": o}))
        .collect();

    let umm = json!({
        "MetadataSpecification": {
            "URL": format!("https://cdn.earthdata.nasa.gov/umm/granule/v{}", UMM_VERSION),
            "Name": "UMM-G",
            "Version": UMM_VERSION,
        },
        "GranuleUR": granule_ur,
        "CollectionReference": {
            "ShortName": config.collection.short_name,
            "Version": config.collection.version,
        },
        "RelatedUrls": [
            {
                "URL": format!("{}/{}.nc", config.granule_data.download_path, granule_ur),
                "Type": "GET DATA",
            },
            {
                "URL": format!("{}/{}.png", config.granule_data.browse_path, granule_ur),
                "Type": "GET RELATED VISUALIZATION",
            },
        ],
        "TemporalExtent": {
            "RangeDateTime": {
                "BeginningDateTime": md.sensing_start,
                "EndingDateTime": md.sensing_stop,
            },
        },
        "SpatialExtent": {
            "HorizontalSpatialDomain": {
                "Geometry": {
                    "GPolygons": [{"Boundary": {"Points": points}}],
                },
            },
        },
        "ProviderDates": [
            {"Date": now, "Type": "Insert"},
            {"Date": now, "Type": "Update"},
        ],
        "DataGranule": {
            "ArchiveAndDistributionInformation": [
                {"Name": product.key, "SizeInBytes": file_size},
            ],
            "DayNightFlag": "Unspecified",
            "ProductionDateTime": sds.creation_timestamp,
        },
        "Platforms": platforms,
        "OrbitCalculatedSpatialDomains": orbits,
        "InputGranules": md.scenes.all(),
        "AdditionalAttributes": attributes,
    });

    Ok(sort_keys(umm))
}

pub async fn handler(
    payload: Option<Value>,
    config: &Config,
    s3: &aws_sdk_s3::Client,
) -> Result<Value> {
    let config: UmmConfig = config.section(SECTION)?;
    let inputs: ProductLocations = crate::parse_payload(payload)?;

    tracing::info!("creating metadata file for {}", inputs.product.key);

    let sds = SdsMetadata::from_slice(&s3objects::get_bytes(s3, &inputs.metadata).await?)?;
    let file_size = s3objects::size(s3, &inputs.product).await?;
    let umm = render_granule_metadata(&sds, &config, &inputs.product, file_size, &echo10::now())?;

    let dest = OutputLocation::new(config.output_bucket.clone(), format!("{}.umm.json", sds.label));
    s3objects::put(s3, &dest, serde_json::to_vec(&umm)?, CONTENT_TYPE).await?;
    Ok(serde_json::to_value(dest)?)
}
