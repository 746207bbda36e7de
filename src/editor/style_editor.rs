use crate::{
    error::{EditError, PersistFailure},
    gateway::RemoteGateway,
    geofile::feature::{FeatureId, LayerId},
    style::{resolve, GeometryKind, PartialStyle, StyleField, StyleRecord, StyleValue},
    sync::{ClickTarget, LayerSyncEngine, MapSurface},
};

/// What a style editor edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleTarget {
    Feature {
        layer_id: LayerId,
        feature_id: FeatureId,
    },
    /// The style of every feature of the layer that has none of its own.
    LayerDefault { layer_id: LayerId },
}

/// Holds a draft style for one feature or layer default.
///
/// Setting a field builds a new draft and leaves the seed alone, so the
/// editor can always tell what changed since it was opened or last saved.
#[derive(Debug, Clone)]
pub struct StyleEditor {
    target: StyleTarget,
    kind: GeometryKind,
    seed: StyleRecord,
    draft: StyleRecord,
}

impl StyleEditor {
    pub fn new(target: StyleTarget, kind: GeometryKind, stored: Option<&PartialStyle>) -> Self {
        let seed = resolve(kind, stored);
        Self {
            target,
            kind,
            draft: seed.clone(),
            seed,
        }
    }

    /// Open the editor on a drawn feature, seeded with the style it is drawn
    /// with. `None` if the feature is not drawn.
    pub fn for_feature<G: RemoteGateway, S: MapSurface>(
        engine: &LayerSyncEngine<G, S>,
        layer_id: &LayerId,
        feature_id: FeatureId,
    ) -> Option<Self> {
        let kind = engine.layer_kind(layer_id)?;
        let drawn = engine.feature_style(layer_id, feature_id)?;
        Some(Self::new(
            StyleTarget::Feature {
                layer_id: layer_id.clone(),
                feature_id,
            },
            kind,
            Some(&PartialStyle::from(&drawn)),
        ))
    }

    pub fn for_layer_default<G: RemoteGateway, S: MapSurface>(
        engine: &LayerSyncEngine<G, S>,
        layer_id: &LayerId,
        kind: GeometryKind,
    ) -> Self {
        Self::new(
            StyleTarget::LayerDefault {
                layer_id: layer_id.clone(),
            },
            kind,
            engine.layer_default(layer_id),
        )
    }

    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    pub fn seed(&self) -> &StyleRecord {
        &self.seed
    }

    pub fn draft(&self) -> &StyleRecord {
        &self.draft
    }

    pub fn is_dirty(&self) -> bool {
        self.seed != self.draft
    }

    /// Set one field and return the new draft. Fields that do not exist for
    /// the draft's geometry kind are refused.
    pub fn set(
        &mut self,
        field: StyleField,
        value: impl Into<StyleValue>,
    ) -> Result<&StyleRecord, EditError> {
        if !field.applies_to(self.kind) {
            return Err(EditError::NotApplicable {
                field: field.name().to_string(),
                kind: self.kind.name().to_string(),
            });
        }
        let mut partial = PartialStyle::from(&self.draft);
        partial.set(field, value.into())?;
        self.draft = resolve(self.kind, Some(&partial));
        Ok(&self.draft)
    }

    /// Set a field from its stored name and a typed-in value.
    pub fn set_text(&mut self, field_name: &str, text: &str) -> Result<&StyleRecord, EditError> {
        let field = StyleField::parse(field_name)?;
        let value = StyleValue::parse_for(field, text)?;
        self.set(field, value)
    }

    /// Drop every change since the editor was opened or last saved.
    pub fn reset(&mut self) {
        self.draft = self.seed.clone();
    }

    /// Apply the draft to the map and save it.
    ///
    /// The draft is drawn before it is saved. If saving fails the drawn style
    /// stays and so does the draft, so the commit can be retried. After a
    /// successful save the feature is reloaded and its saved style drawn.
    /// Layer defaults live for the session only and are never saved.
    pub async fn commit<G: RemoteGateway, S: MapSurface>(
        &mut self,
        engine: &mut LayerSyncEngine<G, S>,
    ) -> Result<(), PersistFailure> {
        let stored = PartialStyle::from(&self.draft);
        match &self.target {
            StyleTarget::LayerDefault { layer_id } => {
                engine.set_layer_default(layer_id, Some(stored));
            }
            StyleTarget::Feature {
                layer_id,
                feature_id,
            } => {
                if engine
                    .apply_style(layer_id, *feature_id, Some(stored))
                    .is_none()
                {
                    log::debug!(
                        "Feature {} of layer {} is not drawn, saving its style only",
                        feature_id,
                        layer_id
                    );
                }
                engine
                    .store()
                    .gateway()
                    .persist_style(layer_id, *feature_id, &self.draft)
                    .await
                    .map_err(|source| PersistFailure::Feature {
                        layer_id: layer_id.clone(),
                        feature_id: *feature_id,
                        source,
                    })?;
                log::info!("Saved style of feature {} in layer {}", feature_id, layer_id);

                let target = ClickTarget {
                    layer_id: layer_id.clone(),
                    feature_id: *feature_id,
                };
                match engine.resolve_click(&target).await {
                    Ok(record) => {
                        engine.replace_feature(record);
                    }
                    Err(err) => log::warn!("Could not reload the saved feature: {}", err),
                }
            }
        }
        self.seed = self.draft.clone();
        Ok(())
    }
}
