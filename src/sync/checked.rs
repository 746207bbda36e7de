use std::collections::BTreeMap;

use crate::{
    geofile::feature::{LayerDescriptor, LayerId},
    style::GeometryKind,
};

/// The layers the user wants to see, with their geometry kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckedLayerSet {
    layers: BTreeMap<LayerId, GeometryKind>,
}

impl CheckedLayerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the checkbox of `layer`. Returns whether it is checked afterwards.
    pub fn toggle(&mut self, layer: &LayerDescriptor) -> bool {
        if self.layers.remove(&layer.id).is_some() {
            false
        } else {
            self.layers.insert(layer.id.clone(), layer.geometry_kind);
            true
        }
    }

    /// Returns false if the layer was already checked.
    pub fn check(&mut self, layer_id: LayerId, kind: GeometryKind) -> bool {
        self.layers.insert(layer_id, kind).is_none()
    }

    /// Returns false if the layer was not checked.
    pub fn uncheck(&mut self, layer_id: &LayerId) -> bool {
        self.layers.remove(layer_id).is_some()
    }

    pub fn contains(&self, layer_id: &LayerId) -> bool {
        self.layers.contains_key(layer_id)
    }

    pub fn kind_of(&self, layer_id: &LayerId) -> Option<GeometryKind> {
        self.layers.get(layer_id).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = &LayerId> {
        self.layers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LayerId, GeometryKind)> {
        self.layers.iter().map(|(id, kind)| (id, *kind))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl FromIterator<(LayerId, GeometryKind)> for CheckedLayerSet {
    fn from_iter<I: IntoIterator<Item = (LayerId, GeometryKind)>>(iter: I) -> Self {
        Self {
            layers: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a LayerDescriptor> for CheckedLayerSet {
    fn from_iter<I: IntoIterator<Item = &'a LayerDescriptor>>(iter: I) -> Self {
        iter.into_iter()
            .map(|layer| (layer.id.clone(), layer.geometry_kind))
            .collect()
    }
}
