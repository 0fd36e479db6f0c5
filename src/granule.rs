//! The SDS product metadata document and the bits of geometry we derive
//! from it.
//!
//! Products have been delivered with two generations of metadata. Older
//! products use camelCase keys and call the two acquisitions the "master"
//! and "slave" scenes; current ones use snake_case keys and "reference" and
//! "secondary". Both deserialize into the same [`ProductMetadata`]; the
//! scene list names tell us which [`Dialect`] we were handed, and a few
//! output fields depend on that.

use geo::{Intersects, LineString, Polygon};
use serde::Deserialize;
use serde_json::{Number, Value};
use std::collections::BTreeSet;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct SdsMetadata {
    pub label: String,
    pub creation_timestamp: String,
    #[serde(default)]
    pub version: Option<Value>,
    pub location: Location,
    pub metadata: ProductMetadata,
}

/// A GeoJSON polygon.
#[derive(Clone, Debug, Deserialize)]
pub struct Location {
    pub coordinates: Vec<Vec<Vec<Number>>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProductMetadata {
    #[serde(alias = "sensingStart")]
    pub sensing_start: String,
    #[serde(alias = "sensingStop")]
    pub sensing_stop: String,
    #[serde(alias = "orbitNumber")]
    pub orbit_number: Vec<i64>,
    pub platform: Vec<String>,
    #[serde(alias = "beamMode")]
    pub beam_mode: String,
    #[serde(alias = "direction")]
    pub orbit_direction: String,
    pub dataset_type: String,
    pub product_type: String,
    #[serde(default)]
    pub polarization: Option<String>,
    #[serde(alias = "lookDirection")]
    pub look_direction: String,
    #[serde(alias = "trackNumber")]
    pub track_number: Number,
    #[serde(alias = "bbox")]
    pub ogr_bbox: Vec<Vec<Number>>,
    #[serde(alias = "perpendicularBaseline")]
    pub perpendicular_baseline: Number,
    #[serde(default)]
    pub swath: Option<Value>,
    #[serde(default)]
    pub frame_number: Option<Number>,
    #[serde(default)]
    pub temporal_baseline_days: Option<Number>,
    #[serde(default)]
    pub weather_model: Option<Value>,
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(flatten)]
    pub scenes: InputScenes,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dialect {
    Legacy,
    Current,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum InputScenes {
    Current {
        reference_scenes: Vec<String>,
        secondary_scenes: Vec<String>,
    },
    Legacy {
        master_scenes: Vec<String>,
        slave_scenes: Vec<String>,
    },
}

impl InputScenes {
    pub fn dialect(&self) -> Dialect {
        match self {
            InputScenes::Current { .. } => Dialect::Current,
            InputScenes::Legacy { .. } => Dialect::Legacy,
        }
    }

    /// Scene names tagged with the role they play, in the vocabulary of the
    /// dialect they arrived in.
    pub fn labelled(&self) -> Vec<String> {
        let (first_tag, first, second_tag, second) = match self {
            InputScenes::Current {
                reference_scenes,
                secondary_scenes,
            } => ("Reference", reference_scenes, "Secondary", secondary_scenes),
            InputScenes::Legacy {
                master_scenes,
                slave_scenes,
            } => ("Master", master_scenes, "Slave", slave_scenes),
        };

        first
            .iter()
            .map(|s| format!("[{}] {}", first_tag, s))
            .chain(second.iter().map(|s| format!("[{}] {}", second_tag, s)))
            .collect()
    }

    pub fn all(&self) -> Vec<String> {
        match self {
            InputScenes::Current {
                reference_scenes,
                secondary_scenes,
            } => reference_scenes.iter().chain(secondary_scenes).cloned().collect(),
            InputScenes::Legacy {
                master_scenes,
                slave_scenes,
            } => master_scenes.iter().chain(slave_scenes).cloned().collect(),
        }
    }
}

/// A position as it was written in the metadata. The numbers keep their
/// JSON spelling so that `5.0` is rendered as `5.0`.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub lon: Number,
    pub lat: Number,
}

impl Point {
    fn from_position(pos: &[Number]) -> Result<Self> {
        match pos {
            [lon, lat, ..] => Ok(Point {
                lon: lon.clone(),
                lat: lat.clone(),
            }),
            _ => Err(Error::InvalidMetadata(format!(
                "coordinate {:?} needs at least two values",
                pos
            ))),
        }
    }

    pub fn xy(&self) -> (f64, f64) {
        (
            self.lon.as_f64().unwrap_or(f64::NAN),
            self.lat.as_f64().unwrap_or(f64::NAN),
        )
    }
}

/// An area of interest used to tag granules with a mission name.
#[derive(Clone, Debug, Deserialize)]
pub struct Mission {
    pub name: String,
    pub coords: Vec<[f64; 2]>,
}

impl SdsMetadata {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::InvalidMetadata(e.to_string()))
    }

    pub fn dialect(&self) -> Dialect {
        self.metadata.scenes.dialect()
    }

    /// The exterior ring of the granule footprint, closing point included.
    pub fn exterior_ring(&self) -> Result<Vec<Point>> {
        let ring = self
            .location
            .coordinates
            .first()
            .ok_or_else(|| Error::InvalidMetadata("location has no coordinates".into()))?;
        ring.iter().map(|p| Point::from_position(p)).collect()
    }

    /// The exterior ring without its repeated closing point.
    pub fn open_ring(&self) -> Result<Vec<Point>> {
        let mut ring = self.exterior_ring()?;
        ring.pop();
        Ok(ring)
    }

    /// The group id that ties together all products derived from one label.
    pub fn group_id(&self) -> String {
        self.label.replace('.', "-")
    }
}

impl ProductMetadata {
    /// Corner `i` of the bounding box: near start, far start, far end, near end.
    pub fn corner(&self, i: usize) -> Result<Point> {
        let pos = self
            .ogr_bbox
            .get(i)
            .ok_or_else(|| Error::InvalidMetadata(format!("bounding box lacks corner #{}", i)))?;
        Point::from_position(pos)
    }

    /// All four bounding box corners, in [`corner`](Self::corner) order.
    pub fn bbox(&self) -> Result<Vec<Point>> {
        (0..4).map(|i| self.corner(i)).collect()
    }

    pub fn polarization(&self) -> &str {
        self.polarization.as_deref().unwrap_or("UNSPECIFIED")
    }
}

pub fn translate_asc_desc(value: &str) -> &str {
    match value {
        "asc" => "Ascending",
        "dsc" => "Descending",
        other => other,
    }
}

/// Unique platform names in sorted order, optionally uppercased first.
pub fn unique_platforms(platforms: &[String], uppercase: bool) -> Vec<String> {
    platforms
        .iter()
        .map(|p| if uppercase { p.to_uppercase() } else { p.clone() })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn to_polygon<I: IntoIterator<Item = (f64, f64)>>(coords: I) -> Polygon<f64> {
    Polygon::new(LineString::from(coords.into_iter().collect::<Vec<_>>()), vec![])
}

/// The name of the first mission whose area of interest touches the
/// granule outline.
pub fn find_mission<'a>(outline: &[Point], missions: &'a [Mission]) -> Option<&'a str> {
    let granule = to_polygon(outline.iter().map(Point::xy));

    missions
        .iter()
        .find(|m| granule.intersects(&to_polygon(m.coords.iter().map(|c| (c[0], c[1])))))
        .map(|m| m.name.as_str())
}

/// Flatten an attribute value into the list of strings the catalog stores.
///
/// Numbers keep their JSON spelling, so `12.0` stays `12.0`.
pub fn value_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(value_strings).collect(),
        other => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn current() -> Value {
        json!({
            "label": "S1-GUNW-A-R-064-tops-20230101_20221208-015049-00121W_00036N-PP-0b4d-v3_0_1",
            "creation_timestamp": "2023-01-05T10:11:12.000000Z",
            "version": "3.0.1",
            "location": {
                "type": "Polygon",
                "coordinates": [[[-121.0, 36.0], [-118.0, 36.5], [-118.5, 38.0], [-121.5, 37.5], [-121.0, 36.0]]]
            },
            "metadata": {
                "sensing_start": "2023-01-01T01:50:49.000000Z",
                "sensing_stop": "2023-01-01T01:51:16.000000Z",
                "orbit_number": [46593, 46243],
                "platform": ["Sentinel-1A", "Sentinel-1A"],
                "beam_mode": "IW",
                "orbit_direction": "ascending",
                "dataset_type": "slc",
                "product_type": "interferogram",
                "polarization": "VV",
                "look_direction": "right",
                "track_number": 64,
                "ogr_bbox": [[-121.5, 36.0], [-118.0, 36.0], [-118.0, 38.0], [-121.5, 38.0]],
                "perpendicular_baseline": 45.0,
                "reference_scenes": ["S1A_REF_1", "S1A_REF_2"],
                "secondary_scenes": ["S1A_SEC_1"]
            }
        })
    }

    #[test]
    fn current_dialect() {
        let sds: SdsMetadata = serde_json::from_value(current()).unwrap();
        assert_eq!(sds.dialect(), Dialect::Current);
        assert_eq!(
            sds.metadata.scenes.labelled(),
            vec!["[Reference] S1A_REF_1", "[Reference] S1A_REF_2", "[Secondary] S1A_SEC_1"]
        );
        assert_eq!(sds.metadata.perpendicular_baseline.to_string(), "45.0");
        assert_eq!(sds.metadata.track_number.to_string(), "64");
        assert_eq!(sds.exterior_ring().unwrap().len(), 5);
        assert_eq!(sds.open_ring().unwrap().len(), 4);
        let c = sds.metadata.corner(2).unwrap();
        assert_eq!((c.lon.to_string(), c.lat.to_string()), ("-118.0".to_owned(), "38.0".to_owned()));
        assert_eq!(c.xy(), (-118.0, 38.0));
        assert!(sds.metadata.corner(4).is_err());
        assert_eq!(sds.metadata.bbox().unwrap().len(), 4);
    }

    #[test]
    fn legacy_dialect() {
        let sds: SdsMetadata = serde_json::from_value(json!({
            "label": "S1-IFG_RM_M1S1_TN064_20180101T015049-20171208T015016_s1-resorb-v2.0.2",
            "creation_timestamp": "2018-01-05T10:11:12",
            "location": {"type": "Polygon", "coordinates": [[[1.0, 2.0], [3.0, 2.0], [3.0, 4.0], [1.0, 2.0]]]},
            "metadata": {
                "sensingStart": "2018-01-01T01:50:49",
                "sensingStop": "2018-01-01T01:51:16",
                "orbitNumber": [19893],
                "platform": ["Sentinel-1B", "Sentinel-1A"],
                "beamMode": "IW",
                "direction": "dsc",
                "dataset_type": "slc",
                "product_type": "interferogram",
                "lookDirection": "right",
                "trackNumber": 64,
                "bbox": [[1.0, 2.0], [3.0, 2.0], [3.0, 4.0], [1.0, 4.0]],
                "perpendicularBaseline": -12.25,
                "swath": [1, 2, 3],
                "master_scenes": ["S1B_M"],
                "slave_scenes": ["S1A_S"]
            }
        }))
        .unwrap();

        assert_eq!(sds.dialect(), Dialect::Legacy);
        assert_eq!(sds.metadata.scenes.labelled(), vec!["[Master] S1B_M", "[Slave] S1A_S"]);
        assert_eq!(sds.metadata.scenes.all(), vec!["S1B_M", "S1A_S"]);
        assert_eq!(sds.metadata.polarization(), "UNSPECIFIED");
        assert_eq!(translate_asc_desc(&sds.metadata.orbit_direction), "Descending");
        assert_eq!(sds.group_id(), "S1-IFG_RM_M1S1_TN064_20180101T015049-20171208T015016_s1-resorb-v2-0-2");
    }

    #[test]
    fn positions_keep_their_spelling() {
        let mut doc = current();
        doc["metadata"]["ogr_bbox"] = json!([[5, 1.0], [5.0, 1.25], [1e-3, 2], [0.0, -0.5]]);
        let sds: SdsMetadata = serde_json::from_value(doc).unwrap();

        let text: Vec<String> = sds
            .metadata
            .bbox()
            .unwrap()
            .iter()
            .flat_map(|p| [p.lon.to_string(), p.lat.to_string()])
            .collect();
        assert_eq!(text, vec!["5", "1.0", "5.0", "1.25", "0.001", "2", "0.0", "-0.5"]);
    }

    #[test]
    fn bad_metadata_is_invalid_metadata() {
        let err = SdsMetadata::from_slice(br#"{"label": "x"}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_METADATA");
    }

    #[test]
    fn platforms() {
        let p = vec!["Sentinel-1B".to_owned(), "Sentinel-1A".to_owned(), "Sentinel-1B".to_owned()];
        assert_eq!(unique_platforms(&p, true), vec!["SENTINEL-1A", "SENTINEL-1B"]);
        assert_eq!(unique_platforms(&p, false), vec!["Sentinel-1A", "Sentinel-1B"]);
    }

    #[test]
    fn mission_lookup() {
        let missions = vec![
            Mission {
                name: "Hawaii".into(),
                coords: vec![[-160.0, 18.0], [-154.0, 18.0], [-154.0, 23.0], [-160.0, 23.0]],
            },
            Mission {
                name: "California".into(),
                coords: vec![[-125.0, 32.0], [-114.0, 32.0], [-114.0, 42.0], [-125.0, 42.0]],
            },
        ];
        let sds: SdsMetadata = serde_json::from_value(current()).unwrap();
        let footprint = sds.open_ring().unwrap();
        assert_eq!(find_mission(&footprint, &missions), Some("California"));
        assert_eq!(find_mission(&footprint, &missions[..1]), None);
    }

    #[test]
    fn attribute_values() {
        assert_eq!(value_strings(&json!(["HRRR", "ERA5"])), vec!["HRRR", "ERA5"]);
        assert_eq!(value_strings(&json!(12.0)), vec!["12.0"]);
        assert_eq!(value_strings(&json!("v3")), vec!["v3"]);
        assert!(value_strings(&Value::Null).is_empty());
    }
}
