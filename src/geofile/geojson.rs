use std::{fs, io, path::Path};

use serde_json::{Map, Value};

use crate::style::{resolve, GeometryKind};

use super::feature::FeatureRecord;

/// Build a FeatureCollection of `records`, with attributes, the feature id and
/// the resolved style as properties.
pub fn features_to_collection(
    kind: GeometryKind,
    records: &[FeatureRecord],
) -> geojson::FeatureCollection {
    records
        .iter()
        .map(|record| {
            let mut properties: Map<String, Value> = record
                .attributes
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            properties.insert("id".to_string(), Value::from(record.feature_id.0));
            properties.insert(
                "style".to_string(),
                resolve(kind, record.style.as_ref()).to_json(),
            );
            geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(
                    &record.geometry,
                ))),
                id: Some(geojson::feature::Id::Number(record.feature_id.0.into())),
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect()
}

pub fn write_features_to_geojson(
    kind: GeometryKind,
    records: &[FeatureRecord],
    output_filepath: &Path,
) -> io::Result<()> {
    let feature_collection = features_to_collection(kind, records);
    let geojson_contents: geojson::GeoJson = geojson::GeoJson::from(feature_collection);
    fs::write(output_filepath, geojson_contents.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use testdir::testdir;

    use crate::geofile::feature::{FeatureId, FeatureRecord, LayerId};
    use crate::style::{GeometryKind, PartialStyle};

    use super::write_features_to_geojson;

    #[test]
    fn test_write_features_to_geojson() {
        let records = vec![FeatureRecord {
            feature_id: FeatureId(7),
            layer_id: LayerId::from("parks"),
            geometry: geo::Geometry::Polygon(geo::Polygon::new(
                vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)].into(),
                vec![],
            )),
            attributes: HashMap::from([("name".to_string(), json!("Central"))]),
            style: Some(PartialStyle {
                fill_color: Some("#00ff00".to_string()),
                ..PartialStyle::default()
            }),
        }];

        let output_filepath = testdir!().join("parks.geojson");
        write_features_to_geojson(GeometryKind::Polygon, &records, &output_filepath).unwrap();

        let contents = std::fs::read_to_string(&output_filepath).unwrap();
        let geojson: geojson::GeoJson = contents.parse().unwrap();
        let collection = match geojson {
            geojson::GeoJson::FeatureCollection(collection) => collection,
            other => panic!("Expected a feature collection, got {:?}", other),
        };
        assert_eq!(collection.features.len(), 1);
        let properties = collection.features[0].properties.as_ref().unwrap();
        assert_eq!(properties.get("name"), Some(&json!("Central")));
        assert_eq!(properties.get("id"), Some(&json!(7)));
        assert_eq!(properties["style"]["fillColor"], json!("#00ff00"));
        assert_eq!(properties["style"]["color"], json!("#3388ff"));
    }
}
