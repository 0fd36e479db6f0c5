//! The ECHO10 construction service.
//!
//! Given a packaged product (or the whole fan-out of derived products that
//! the packaging step produced), read the SDS metadata, map it onto the
//! ECHO10 granule fields, render the XML and drop it in the output bucket.
//! The resulting locations are what the CMR submission step consumes.

use askama::Template;
use lambda_runtime::tracing;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{
    config::Config,
    error::{Error, Result},
    granule::{
        find_mission, translate_asc_desc, unique_platforms, value_strings, Dialect, Mission,
        Point, SdsMetadata,
    },
    s3objects::{self, OutputLocation, ProductLocations},
};

pub const SECTION: &str = "echo10_construction";
pub const DEFAULT_COLLECTION: &str = "default";
pub const ASF_PLATFORM: &str = "Sentinel-1 Interferogram (BETA)";
pub const CONTENT_TYPE: &str = "application/xml";

#[derive(Debug, Deserialize)]
pub struct Echo10Config {
    pub output_bucket: String,
    pub granule_data: GranuleDataConfig,
}

#[derive(Debug, Deserialize)]
pub struct GranuleDataConfig {
    /// URL template for the browse image; `{0}` or `{}` is the browse key.
    pub browse_path: String,
    /// URL template for the product download; `{0}` or `{}` is the product key.
    pub download_path: String,
    /// Collections keyed by derived-product name, plus a `default`.
    pub collections: BTreeMap<String, Collection>,
    #[serde(default)]
    pub missions: Vec<Mission>,
}

#[derive(Debug, Deserialize)]
pub struct Collection {
    pub dataset_id: String,
    pub processing_type: String,
    pub processing_type_display: String,
    pub processing_description: String,
}

impl GranuleDataConfig {
    /// Pick the collection for a product from the derived-product name
    /// embedded in its key (`<product>.<name>.zip`).
    pub fn collection_for(&self, product_key: &str) -> Result<(&str, &Collection)> {
        let derived = self
            .collections
            .iter()
            .filter(|(name, _)| name.as_str() != DEFAULT_COLLECTION)
            .find(|(name, _)| product_key.ends_with(&format!(".{}.zip", name)));

        if let Some((name, coll)) = derived {
            return Ok((name.as_str(), coll));
        }

        self.collections
            .get(DEFAULT_COLLECTION)
            .map(|c| (DEFAULT_COLLECTION, c))
            .ok_or_else(|| {
                Error::Config(format!(
                    "no collection matches `{}` and no `{}` collection is configured",
                    product_key, DEFAULT_COLLECTION
                ))
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Echo10Request {
    Single(ProductLocations),
    FanOut(BTreeMap<String, ProductLocations>),
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Echo10Response {
    Single(OutputLocation),
    FanOut(Vec<OutputLocation>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AdditionalAttribute {
    pub name: String,
    pub values: Vec<String>,
}

impl AdditionalAttribute {
    fn new<V: ToString>(name: &str, value: V) -> Self {
        AdditionalAttribute {
            name: name.to_owned(),
            values: vec![value.to_string()],
        }
    }

    fn from_value(name: &str, value: &Value) -> Option<Self> {
        let values = value_strings(value);

        if values.is_empty() {
            None
        } else {
            Some(AdditionalAttribute {
                name: name.to_owned(),
                values,
            })
        }
    }
}

/// Everything the ECHO10 template needs for one granule.
#[derive(Clone, Debug)]
pub struct Echo10Granule {
    pub granule_ur: String,
    pub insert_time: String,
    pub last_update: String,
    pub collection: String,
    pub size_mb_data_granule: String,
    pub producer_granule_id: String,
    pub production_date_time: String,
    pub beginning_date_time: String,
    pub ending_date_time: String,
    pub orbits: Vec<i64>,
    pub platforms: Vec<String>,
    pub sensor_short_name: String,
    /// Clockwise, without the closing point.
    pub polygon: Vec<Point>,
    pub additional_attributes: Vec<AdditionalAttribute>,
    pub input_granules: Vec<String>,
    pub visible: bool,
    pub orderable: bool,
    pub online_access_url: String,
    pub browse_url: String,
}

impl Echo10Granule {
    pub fn attribute(&self, name: &str) -> Option<&AdditionalAttribute> {
        self.additional_attributes.iter().find(|a| a.name == name)
    }
}

#[derive(Template)]
#[template(path = "echo10.xml")]
struct Echo10Template<'a> {
    granule: &'a Echo10Granule,
}

/// Spell a float the way the catalog has always received it: shortest
/// round-trip digits, with a two-digit signed exponent outside
/// `1e-4 <= |x| < 1e16` (`2.0`, `0.5`, `9.5367431640625e-06`).
pub fn float_repr(x: f64) -> String {
    let text = format!("{:?}", x);

    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => text,
    }
}

pub fn format_path(template: &str, key: &str) -> String {
    template.replace("{0}", key).replace("{}", key)
}

pub fn granule_data(
    inputs: &ProductLocations,
    sds: &SdsMetadata,
    file_size: u64,
    config: &GranuleDataConfig,
    now: &str,
) -> Result<Echo10Granule> {
    let md = &sds.metadata;
    let (coll_name, collection) = config.collection_for(&inputs.product.key)?;

    let granule_ur = if sds.dialect() == Dialect::Current && coll_name == DEFAULT_COLLECTION {
        sds.label.clone()
    } else {
        format!("{}-{}", sds.label, collection.processing_type)
    };

    let browse_url = format_path(&config.browse_path, &inputs.browse.key);
    let online_access_url = format_path(&config.download_path, &inputs.product.key);

    // GeoJSON rings run counterclockwise; ECHO10 wants them clockwise.
    let footprint = sds.open_ring()?;

    // Legacy products were matched to missions by their bounding box.
    let mission = match sds.dialect() {
        Dialect::Current => find_mission(&footprint, &config.missions),
        Dialect::Legacy => find_mission(&md.bbox()?, &config.missions),
    };

    let mut polygon = footprint;
    polygon.reverse();

    let corners = [
        md.corner(0)?,
        md.corner(1)?,
        md.corner(2)?,
        md.corner(3)?,
    ];

    let mut attrs = vec![
        AdditionalAttribute::new("GROUP_ID", sds.group_id()),
        AdditionalAttribute::new("ASCENDING_DESCENDING", translate_asc_desc(&md.orbit_direction)),
        AdditionalAttribute::new("BEAM_MODE_TYPE", &md.dataset_type),
        AdditionalAttribute::new("BEAM_MODE", &md.beam_mode),
        AdditionalAttribute::new("BEAM_MODE_DESC", &md.product_type),
        AdditionalAttribute::new("POLARIZATION", md.polarization()),
        AdditionalAttribute::new("LOOK_DIRECTION", &md.look_direction),
        AdditionalAttribute::new("PATH_NUMBER", &md.track_number),
        AdditionalAttribute::new("BYTES", file_size),
    ];

    for (prefix, corner) in ["NEAR_START", "FAR_START", "FAR_END", "NEAR_END"]
        .iter()
        .zip(corners.iter())
    {
        attrs.push(AdditionalAttribute::new(&format!("{}_LON", prefix), &corner.lon));
        attrs.push(AdditionalAttribute::new(&format!("{}_LAT", prefix), &corner.lat));
    }

    attrs.extend([
        AdditionalAttribute::new("ASF_PLATFORM", ASF_PLATFORM),
        AdditionalAttribute::new("PROCESSING_TYPE", &collection.processing_type),
        AdditionalAttribute::new("PROCESSING_TYPE_DISPLAY", &collection.processing_type_display),
        AdditionalAttribute::new("PROCESSING_DESCRIPTION", &collection.processing_description),
        AdditionalAttribute::new("THUMBNAIL_URL", &browse_url),
        AdditionalAttribute::new("PERPENDICULAR_BASELINE", &md.perpendicular_baseline),
    ]);

    let optional = [
        ("SUB_SWATH", md.swath.clone()),
        ("MISSION_NAME", mission.map(|m| Value::String(m.to_owned()))),
        ("VERSION", sds.version.clone()),
        (
            "TEMPORAL_BASELINE_DAYS",
            md.temporal_baseline_days.clone().map(Value::Number),
        ),
        ("WEATHER_MODEL", md.weather_model.clone()),
        ("FRAME_NUMBER", md.frame_number.clone().map(Value::Number)),
    ];

    attrs.extend(
        optional
            .iter()
            .filter_map(|(name, v)| v.as_ref().and_then(|v| AdditionalAttribute::from_value(name, v))),
    );

    Ok(Echo10Granule {
        granule_ur,
        insert_time: now.to_owned(),
        last_update: now.to_owned(),
        collection: collection.dataset_id.clone(),
        size_mb_data_granule: float_repr(file_size as f64 / 1024. / 1024.),
        producer_granule_id: sds.label.clone(),
        production_date_time: sds.creation_timestamp.clone(),
        beginning_date_time: md.sensing_start.clone(),
        ending_date_time: md.sensing_stop.clone(),
        orbits: md.orbit_number.clone(),
        platforms: unique_platforms(&md.platform, true),
        sensor_short_name: md.beam_mode.clone(),
        polygon,
        additional_attributes: attrs,
        input_granules: md.scenes.labelled(),
        visible: true,
        orderable: true,
        online_access_url,
        browse_url,
    })
}

pub fn render(granule: &Echo10Granule) -> Result<String> {
    Ok(Echo10Template { granule }.render()?)
}

pub fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

async fn create_granule_echo10(
    inputs: &ProductLocations,
    config: &Echo10Config,
    s3: &aws_sdk_s3::Client,
) -> Result<OutputLocation> {
    tracing::info!("creating echo10 file for {}", inputs.product.key);

    let sds = SdsMetadata::from_slice(&s3objects::get_bytes(s3, &inputs.metadata).await?)?;
    let file_size = s3objects::size(s3, &inputs.product).await?;
    let granule = granule_data(inputs, &sds, file_size, &config.granule_data, &now())?;
    let xml = render(&granule)?;

    let dest = OutputLocation::new(
        config.output_bucket.clone(),
        format!("{}.echo10", granule.granule_ur),
    );
    s3objects::put(s3, &dest, xml.into_bytes(), CONTENT_TYPE).await?;
    Ok(dest)
}

pub async fn handler(
    payload: Option<Value>,
    config: &Config,
    s3: &aws_sdk_s3::Client,
) -> Result<Value> {
    let config: Echo10Config = config.section(SECTION)?;
    let request: Echo10Request = crate::parse_payload(payload)?;

    let response = match request {
        Echo10Request::Single(inputs) => {
            Echo10Response::Single(create_granule_echo10(&inputs, &config, s3).await?)
        }

        Echo10Request::FanOut(products) => {
            let mut locations = Vec::with_capacity(products.len());

            for (label, inputs) in &products {
                tracing::debug!("fan-out product `{}`", label);
                locations.push(create_granule_echo10(inputs, &config, s3).await?);
            }

            Echo10Response::FanOut(locations)
        }
    };

    Ok(serde_json::to_value(response)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3objects::S3Object;
    use serde_json::json;

    fn config() -> GranuleDataConfig {
        serde_json::from_value(json!({
            "browse_path": "https://example.org/browse/{0}",
            "download_path": "https://example.org/data/{0}",
            "collections": {
                "default": {
                    "dataset_id": "SENTINEL-1 INTERFEROGRAM (BETA)",
                    "processing_type": "GUNW_STD",
                    "processing_type_display": "Standard Product",
                    "processing_description": "Standard GUNW product"
                },
                "unw_geo": {
                    "dataset_id": "SENTINEL-1 INTERFEROGRAM (BETA) UNWRAPPED",
                    "processing_type": "GUNW_UNW",
                    "processing_type_display": "Unwrapped Interferogram",
                    "processing_description": "Geocoded unwrapped phase"
                }
            },
            "missions": [
                {"name": "NISAR Cal/Val", "coords": [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]}
            ]
        }))
        .unwrap()
    }

    fn sds() -> SdsMetadata {
        serde_json::from_value(json!({
            "label": "S1-GUNW-D-R-001-tops-20240101_20231226-000000-00005E_00005N-PP-aaaa-v3_0_0",
            "creation_timestamp": "2024-01-02T00:00:00.000000Z",
            "version": "3.0.0",
            "location": {"type": "Polygon", "coordinates": [[[1.0, 1.0], [5.0, 1.0], [5.0, 5.0], [1.0, 5.0], [1.0, 1.0]]]},
            "metadata": {
                "sensing_start": "2024-01-01T00:00:00.000000Z",
                "sensing_stop": "2024-01-01T00:00:30.000000Z",
                "orbit_number": [51000, 51600],
                "platform": ["Sentinel-1A", "Sentinel-1A"],
                "beam_mode": "IW",
                "orbit_direction": "descending",
                "dataset_type": "slc",
                "product_type": "interferogram",
                "polarization": "VV",
                "look_direction": "right",
                "track_number": 1,
                "ogr_bbox": [[1.0, 1.0], [5.0, 1.0], [5.0, 5.0], [1.0, 5.0]],
                "perpendicular_baseline": 12.0,
                "temporal_baseline_days": 6,
                "frame_number": 100,
                "weather_model": ["HRRR"],
                "reference_scenes": ["S1A_REF"],
                "secondary_scenes": ["S1A_SEC"]
            }
        }))
        .unwrap()
    }

    fn inputs(product_key: &str) -> ProductLocations {
        ProductLocations {
            product: S3Object::new("products", product_key),
            metadata: S3Object::new("metadata", "g.json"),
            browse: S3Object::new("browse", "g.png"),
        }
    }

    #[test]
    fn collection_selection() {
        let config = config();
        assert_eq!(config.collection_for("g.zip").unwrap().0, "default");
        assert_eq!(config.collection_for("g.unw_geo.zip").unwrap().0, "unw_geo");
        assert_eq!(config.collection_for("g.full_res.zip").unwrap().0, "default");
    }

    #[test]
    fn default_product_keeps_label() {
        let sds = sds();
        let g = granule_data(&inputs("g.zip"), &sds, 2 * 1024 * 1024, &config(), "2024-03-02T22:12:36Z")
            .unwrap();

        assert_eq!(g.granule_ur, sds.label);
        assert_eq!(g.size_mb_data_granule, "2.0");
        assert_eq!(g.platforms, vec!["SENTINEL-1A"]);
        assert_eq!(g.input_granules, vec!["[Reference] S1A_REF", "[Secondary] S1A_SEC"]);
        assert_eq!(g.online_access_url, "https://example.org/data/g.zip");
        assert_eq!(g.polygon.len(), 4);
        assert_eq!(g.polygon[0].xy(), (1.0, 5.0));
        assert_eq!(g.polygon[0].lat.to_string(), "5.0");

        assert_eq!(g.attribute("BYTES").unwrap().values, vec!["2097152"]);
        assert_eq!(g.attribute("PERPENDICULAR_BASELINE").unwrap().values, vec!["12.0"]);
        assert_eq!(g.attribute("FAR_END_LAT").unwrap().values, vec!["5.0"]);
        assert_eq!(g.attribute("MISSION_NAME").unwrap().values, vec!["NISAR Cal/Val"]);
        assert_eq!(g.attribute("WEATHER_MODEL").unwrap().values, vec!["HRRR"]);
        assert_eq!(g.attribute("TEMPORAL_BASELINE_DAYS").unwrap().values, vec!["6"]);
        assert_eq!(g.attribute("THUMBNAIL_URL").unwrap().values, vec!["https://example.org/browse/g.png"]);
        assert!(g.attribute("SUB_SWATH").is_none());
    }

    #[test]
    fn derived_product_gets_suffixed_ur() {
        let g = granule_data(&inputs("g.unw_geo.zip"), &sds(), 10, &config(), "now").unwrap();
        assert!(g.granule_ur.ends_with("-GUNW_UNW"));
        assert_eq!(g.collection, "SENTINEL-1 INTERFEROGRAM (BETA) UNWRAPPED");
        assert_eq!(g.attribute("PROCESSING_TYPE").unwrap().values, vec!["GUNW_UNW"]);
    }

    #[test]
    fn attribute_order_is_fixed() {
        let g = granule_data(&inputs("g.zip"), &sds(), 10, &config(), "now").unwrap();
        let names: Vec<_> = g.additional_attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(&names[..3], &["GROUP_ID", "ASCENDING_DESCENDING", "BEAM_MODE_TYPE"]);
        assert_eq!(
            &names[names.len() - 5..],
            &["MISSION_NAME", "VERSION", "TEMPORAL_BASELINE_DAYS", "WEATHER_MODEL", "FRAME_NUMBER"]
        );
    }

    #[test]
    fn rendered_xml() {
        let g = granule_data(&inputs("g.zip"), &sds(), 1024, &config(), "2024-03-02T22:12:36Z").unwrap();
        let xml = render(&g).unwrap();

        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(&format!("<GranuleUR>{}</GranuleUR>", g.granule_ur)));
        assert!(xml.contains("<InsertTime>2024-03-02T22:12:36Z</InsertTime>"));
        assert!(xml.contains("<OrbitNumber>51600</OrbitNumber>"));
        assert!(xml.contains("<Name>FRAME_NUMBER</Name>"));
        assert!(xml.contains("<InputGranule>[Reference] S1A_REF</InputGranule>"));
        assert!(xml.contains("<Value>NISAR Cal"));
        assert_eq!(xml.matches("<Point>").count(), 4);
    }

    #[test]
    fn sizes_are_spelled_like_floats() {
        assert_eq!(float_repr(2.0), "2.0");
        assert_eq!(float_repr(0.5), "0.5");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(10.0 / 1024. / 1024.), "9.5367431640625e-06");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-10), "1.5e-10");

        let g = granule_data(&inputs("g.zip"), &sds(), 10, &config(), "now").unwrap();
        let xml = render(&g).unwrap();
        assert!(xml.contains("<SizeMBDataGranule>9.5367431640625e-06</SizeMBDataGranule>"));
        assert!(xml.contains("<PointLatitude>5.0</PointLatitude>"));
        assert!(xml.contains("<Value>5.0</Value>"));
    }

    #[test]
    fn legacy_missions_come_from_the_bounding_box() {
        let doc = json!({
            "label": "S1-IFG_RM_M1S1_TN001_20180101T000000-20171226T000000_s1-resorb-v2.0.2",
            "creation_timestamp": "2018-01-02T00:00:00",
            "location": {"type": "Polygon", "coordinates": [[[20.0, 20.0], [25.0, 20.0], [25.0, 25.0], [20.0, 25.0], [20.0, 20.0]]]},
            "metadata": {
                "sensingStart": "2018-01-01T00:00:00",
                "sensingStop": "2018-01-01T00:00:30",
                "orbitNumber": [19893],
                "platform": ["Sentinel-1B"],
                "beamMode": "IW",
                "direction": "asc",
                "dataset_type": "slc",
                "product_type": "interferogram",
                "lookDirection": "right",
                "trackNumber": 1,
                "bbox": [[1.0, 1.0], [5.0, 1.0], [5.0, 5.0], [1.0, 5.0]],
                "perpendicularBaseline": 3.5,
                "master_scenes": ["S1B_M"],
                "slave_scenes": ["S1B_S"]
            }
        });
        let legacy: SdsMetadata = serde_json::from_value(doc).unwrap();

        let g = granule_data(&inputs("g.zip"), &legacy, 10, &config(), "now").unwrap();
        assert_eq!(g.attribute("MISSION_NAME").unwrap().values, vec!["NISAR Cal/Val"]);

        // The same outline in a current product is matched by its footprint.
        let mut current = sds();
        current.location = legacy.location.clone();
        let g = granule_data(&inputs("g.zip"), &current, 10, &config(), "now").unwrap();
        assert!(g.attribute("MISSION_NAME").is_none());
    }

    #[test]
    fn path_templates() {
        assert_eq!(format_path("https://x/{0}", "a.zip"), "https://x/a.zip");
        assert_eq!(format_path("https://x/{}", "a.zip"), "https://x/a.zip");
    }
}
