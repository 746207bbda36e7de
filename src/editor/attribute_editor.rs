use std::sync::Arc;

use serde_json::Value;

use crate::{
    error::PersistFailure,
    gateway::RemoteGateway,
    geofile::feature::{FeatureDraft, FeatureId, FeatureRecord, LayerId},
    sync::{ClickTarget, LayerSyncEngine, MapSurface},
};

/// Edits the attribute values of an existing feature, or collects the values
/// of a feature about to be created.
#[derive(Debug, Clone)]
pub struct AttributeEditor {
    layer_id: LayerId,
    /// `None` while creating.
    feature_id: Option<FeatureId>,
    draft: FeatureDraft,
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl AttributeEditor {
    /// Seed the editor with the attributes of `record`, sorted by column.
    pub fn edit(record: &FeatureRecord) -> Self {
        let mut attributes: Vec<(String, String)> = record
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), display_value(value)))
            .collect();
        attributes.sort();
        Self {
            layer_id: record.layer_id.clone(),
            feature_id: Some(record.feature_id),
            draft: FeatureDraft {
                geometry: None,
                attributes,
            },
        }
    }

    pub fn create(layer_id: LayerId, geometry: geojson::Geometry) -> Self {
        Self {
            layer_id,
            feature_id: None,
            draft: FeatureDraft {
                geometry: Some(geometry),
                attributes: Vec::new(),
            },
        }
    }

    pub fn layer_id(&self) -> &LayerId {
        &self.layer_id
    }

    pub fn draft(&self) -> &FeatureDraft {
        &self.draft
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.draft
            .attributes
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .draft
            .attributes
            .iter_mut()
            .find(|(column, _)| column == name)
        {
            Some((_, current)) => *current = value,
            None => self.draft.attributes.push((name.to_string(), value)),
        }
    }

    /// Save the draft and return the id of the saved feature, when known.
    ///
    /// An edited feature is reloaded and its cached record replaced. A created
    /// feature changes the layer's geometry, so the whole layer is reloaded
    /// whether or not the portal reported the new id.
    pub async fn commit<G: RemoteGateway, S: MapSurface>(
        &self,
        engine: &mut LayerSyncEngine<G, S>,
    ) -> Result<Option<FeatureId>, PersistFailure> {
        let gateway = Arc::clone(engine.store().gateway());
        match self.feature_id {
            Some(feature_id) => {
                gateway
                    .update_feature(&self.layer_id, feature_id, &self.draft)
                    .await
                    .map_err(|source| PersistFailure::Feature {
                        layer_id: self.layer_id.clone(),
                        feature_id,
                        source,
                    })?;
                log::info!(
                    "Saved attributes of feature {} in layer {}",
                    feature_id,
                    self.layer_id
                );
                let target = ClickTarget {
                    layer_id: self.layer_id.clone(),
                    feature_id,
                };
                match engine.resolve_click(&target).await {
                    Ok(record) => {
                        engine.replace_feature(record);
                    }
                    Err(err) => log::warn!("Could not reload the saved feature: {}", err),
                }
                Ok(Some(feature_id))
            }
            None => {
                let created = gateway
                    .persist_feature(&self.layer_id, &self.draft)
                    .await
                    .map_err(|source| PersistFailure::Create {
                        layer_id: self.layer_id.clone(),
                        source,
                    })?;
                match created {
                    Some(feature_id) => {
                        log::info!("Created feature {} in layer {}", feature_id, self.layer_id)
                    }
                    None => log::info!("Created a feature in layer {}", self.layer_id),
                }
                engine.refresh_layer(&self.layer_id);
                Ok(created)
            }
        }
    }
}
