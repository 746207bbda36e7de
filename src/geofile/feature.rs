use std::{collections::HashMap, fmt};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::ParseFailure,
    style::{GeometryKind, PartialStyle},
};

/// Attribute values of a feature, keyed by column id.
pub type FeatureMap = HashMap<String, Value>;

/// Identifier of a layer (the table holding its features).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub String);

impl LayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a feature within its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(pub i64);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FeatureId {
    /// Read an id as stored by the portal: a JSON integer or a numeric string.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(FeatureId),
            Value::String(text) => text.trim().parse::<i64>().ok().map(FeatureId),
            _ => None,
        }
    }
}

/// An entry of the layer catalog. Never mutated after the catalog is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDescriptor {
    pub id: LayerId,
    pub geometry_kind: GeometryKind,
    pub display_name: String,
    pub division: Option<String>,
}

/// Columns of a feature row that are not attributes.
const RESERVED_COLUMNS: [&str; 4] = ["id", "geojson", "style", "geom"];

/// A feature row as returned by the remote store, before parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFeatureRow {
    pub id: Option<Value>,
    /// Serialized GeoJSON geometry.
    pub geometry: Option<String>,
    /// Serialized style object.
    pub style: Option<String>,
    pub attributes: Map<String, Value>,
}

impl RawFeatureRow {
    /// Split a JSON row into its reserved columns and attributes.
    pub fn from_json_object(mut object: Map<String, Value>) -> Self {
        let text = |value: Option<Value>| match value {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text),
            _ => None,
        };
        let id = object.remove("id");
        let geometry = text(object.remove("geojson"));
        let style = text(object.remove("style"));
        for column in RESERVED_COLUMNS {
            object.remove(column);
        }
        Self {
            id,
            geometry,
            style,
            attributes: object,
        }
    }
}

/// A parsed feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub feature_id: FeatureId,
    pub layer_id: LayerId,
    pub geometry: geo::Geometry,
    pub attributes: FeatureMap,
    /// Stored style, `None` means the geometry kind default applies.
    pub style: Option<PartialStyle>,
}

pub fn parse_geometry(text: &str) -> Result<geo::Geometry, String> {
    let geojson: geojson::GeoJson = text.parse().map_err(|err| format!("{}", err))?;
    let geometry = match geojson {
        geojson::GeoJson::Geometry(geometry) => geometry,
        geojson::GeoJson::Feature(feature) => feature
            .geometry
            .ok_or_else(|| "feature without geometry".to_string())?,
        geojson::GeoJson::FeatureCollection(_) => {
            return Err("expected a geometry, found a feature collection".to_string())
        }
    };
    geo::Geometry::<f64>::try_from(geometry).map_err(|err| format!("{}", err))
}

impl FeatureRecord {
    pub fn try_from_row(layer_id: &LayerId, row: RawFeatureRow) -> Result<Self, ParseFailure> {
        let feature_id = row
            .id
            .as_ref()
            .and_then(FeatureId::from_json)
            .ok_or_else(|| ParseFailure::MissingId {
                layer_id: layer_id.clone(),
            })?;
        let geometry_text = row.geometry.ok_or_else(|| ParseFailure::MissingGeometry {
            layer_id: layer_id.clone(),
            feature_id,
        })?;
        let geometry = parse_geometry(&geometry_text).map_err(|reason| ParseFailure::Geometry {
            layer_id: layer_id.clone(),
            feature_id,
            reason,
        })?;
        // A broken style does not cost the feature, it falls back to the defaults.
        let style = row.style.and_then(|text| match PartialStyle::parse(&text) {
            Ok(style) => Some(style),
            Err(err) => {
                log::warn!(
                    "Ignoring unreadable style of feature {} in layer {}: {}",
                    feature_id,
                    layer_id,
                    err
                );
                None
            }
        });
        Ok(Self {
            feature_id,
            layer_id: layer_id.clone(),
            geometry,
            attributes: row.attributes.into_iter().collect(),
            style,
        })
    }
}

/// Parse all rows of a layer, dropping (and logging) the ones that fail.
pub fn parse_rows(layer_id: &LayerId, rows: Vec<RawFeatureRow>) -> Vec<FeatureRecord> {
    let num_rows = rows.len();
    let records: Vec<FeatureRecord> = rows
        .into_par_iter()
        .filter_map(|row| match FeatureRecord::try_from_row(layer_id, row) {
            Ok(record) => Some(record),
            Err(err) => {
                log::warn!("Dropping feature: {}", err);
                None
            }
        })
        .collect();
    if records.len() != num_rows {
        log::warn!(
            "Out of {} rows read for layer {}, only {} could be parsed.",
            num_rows,
            layer_id,
            records.len()
        )
    }
    records
}

/// Values for creating or updating a feature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureDraft {
    pub geometry: Option<geojson::Geometry>,
    pub attributes: Vec<(String, String)>,
}
