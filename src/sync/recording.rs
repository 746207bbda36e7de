//! A map surface that draws nothing and remembers every call.
//!
//! Used headless by the command line tool and as the observable surface in
//! tests.

use std::collections::HashMap;

use crate::{
    geofile::feature::{FeatureId, LayerId},
    style::StyleRecord,
};

use super::map_surface::{MapSurface, RenderedLayer};

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Mount { layer_id: LayerId, features: usize },
    Unmount { layer_id: LayerId },
    FitBounds(geo::Rect),
    Restyle { layer_id: LayerId, feature_id: FeatureId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerHandle {
    layer_id: LayerId,
}

#[derive(Debug, Default)]
pub struct RecordingSurface {
    calls: Vec<SurfaceCall>,
    layers: HashMap<LayerId, RenderedLayer>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[SurfaceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// The layer as currently drawn, restyles included.
    pub fn layer(&self, layer_id: &LayerId) -> Option<&RenderedLayer> {
        self.layers.get(layer_id)
    }

    pub fn mount_count(&self, layer_id: &LayerId) -> usize {
        self.count(|call| matches!(call, SurfaceCall::Mount { layer_id: id, .. } if id == layer_id))
    }

    pub fn unmount_count(&self, layer_id: &LayerId) -> usize {
        self.count(|call| matches!(call, SurfaceCall::Unmount { layer_id: id } if id == layer_id))
    }

    pub fn fit_count(&self) -> usize {
        self.count(|call| matches!(call, SurfaceCall::FitBounds(_)))
    }

    fn count(&self, predicate: impl Fn(&SurfaceCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }
}

impl MapSurface for RecordingSurface {
    type Handle = LayerHandle;

    fn mount(&mut self, layer: RenderedLayer) -> LayerHandle {
        log::debug!(
            "Drawing layer {} with {} features",
            layer.layer_id,
            layer.features.len()
        );
        self.calls.push(SurfaceCall::Mount {
            layer_id: layer.layer_id.clone(),
            features: layer.features.len(),
        });
        let handle = LayerHandle {
            layer_id: layer.layer_id.clone(),
        };
        self.layers.insert(layer.layer_id.clone(), layer);
        handle
    }

    fn unmount(&mut self, layer_id: &LayerId, handle: LayerHandle) {
        debug_assert_eq!(&handle.layer_id, layer_id);
        self.layers.remove(layer_id);
        self.calls.push(SurfaceCall::Unmount {
            layer_id: layer_id.clone(),
        });
    }

    fn fit_bounds(&mut self, bounds: geo::Rect) {
        log::debug!("Fitting view to {:?}", bounds);
        self.calls.push(SurfaceCall::FitBounds(bounds));
    }

    fn restyle(&mut self, handle: &LayerHandle, feature_id: FeatureId, style: &StyleRecord) {
        let Some(layer) = self.layers.get_mut(&handle.layer_id) else {
            log::warn!("Restyle for layer {} which is not drawn", handle.layer_id);
            return;
        };
        for feature in layer
            .features
            .iter_mut()
            .filter(|feature| feature.click.feature_id == feature_id)
        {
            feature.representation.restyle(style);
        }
        self.calls.push(SurfaceCall::Restyle {
            layer_id: handle.layer_id.clone(),
            feature_id,
        });
    }
}
