//! In-memory gateway for tests. Layer fetches can be held open and released
//! later, and every call is counted.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;

use crate::{
    error::GatewayError,
    geofile::feature::{FeatureDraft, FeatureId, LayerDescriptor, LayerId, RawFeatureRow},
    style::{GeometryKind, StyleRecord},
};

use super::remote::RemoteGateway;

#[derive(Default)]
struct ScriptState {
    rows: HashMap<LayerId, Vec<Map<String, Value>>>,
    gates: HashMap<LayerId, Arc<Semaphore>>,
    failing: HashSet<LayerId>,
    reject_persist: bool,
    status_only_saves: bool,
    fetch_calls: HashMap<LayerId, usize>,
    feature_calls: usize,
    persisted_styles: Vec<(LayerId, FeatureId, StyleRecord)>,
    updates: Vec<(LayerId, FeatureId, FeatureDraft)>,
    next_feature_id: i64,
}

#[derive(Default)]
pub struct ScriptedGateway {
    layers: Vec<LayerDescriptor>,
    state: Mutex<ScriptState>,
}

pub fn point_row(id: i64, x: f64, y: f64) -> Value {
    json!({
        "id": id,
        "geojson": json!({ "type": "Point", "coordinates": [x, y] }).to_string(),
        "style": null,
        "name": format!("point {}", id),
    })
}

pub fn line_row(id: i64, coordinates: &[(f64, f64)]) -> Value {
    let coordinates: Vec<[f64; 2]> = coordinates.iter().map(|(x, y)| [*x, *y]).collect();
    json!({
        "id": id,
        "geojson": json!({ "type": "LineString", "coordinates": coordinates }).to_string(),
        "style": null,
    })
}

/// A square polygon with its lower left corner at `(x, y)`.
pub fn polygon_row(id: i64, x: f64, y: f64, style: Option<Value>) -> Value {
    let ring = [[x, y], [x + 1.0, y], [x + 1.0, y + 1.0], [x, y + 1.0], [x, y]];
    json!({
        "id": id,
        "geojson": json!({ "type": "Polygon", "coordinates": [ring] }).to_string(),
        "style": style.map(|style| style.to_string()),
    })
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, id: &str, kind: GeometryKind, rows: Vec<Value>) -> Self {
        let layer_id = LayerId::from(id);
        self.layers.push(LayerDescriptor {
            id: layer_id.clone(),
            geometry_kind: kind,
            display_name: id.to_uppercase(),
            division: None,
        });
        let rows = rows
            .into_iter()
            .filter_map(|row| row.as_object().cloned())
            .collect();
        {
            let mut state = self.state.lock();
            state.rows.insert(layer_id, rows);
            state.next_feature_id = 1000;
        }
        self
    }

    pub fn descriptor(&self, id: &str) -> LayerDescriptor {
        self.layers
            .iter()
            .find(|layer| layer.id.as_str() == id)
            .cloned()
            .unwrap_or_else(|| panic!("No scripted layer {}", id))
    }

    /// Hold every fetch of `id` until `release` is called.
    pub fn hold(&self, id: &str) {
        self.state
            .lock()
            .gates
            .insert(LayerId::from(id), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, id: &str) {
        if let Some(gate) = self.state.lock().gates.remove(&LayerId::from(id)) {
            gate.close();
        }
    }

    pub fn fail(&self, id: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(LayerId::from(id));
        } else {
            state.failing.remove(&LayerId::from(id));
        }
    }

    pub fn reject_persist(&self, reject: bool) {
        self.state.lock().reject_persist = reject;
    }

    /// Answer creates without the new id, like portals that only report
    /// `{"status": "saved"}`.
    pub fn status_only_saves(&self, status_only: bool) {
        self.state.lock().status_only_saves = status_only;
    }

    pub fn push_row(&self, id: &str, row: Value) {
        if let Some(row) = row.as_object().cloned() {
            self.state
                .lock()
                .rows
                .entry(LayerId::from(id))
                .or_default()
                .push(row);
        }
    }

    pub fn fetch_calls(&self, id: &str) -> usize {
        self.state
            .lock()
            .fetch_calls
            .get(&LayerId::from(id))
            .copied()
            .unwrap_or(0)
    }

    pub fn feature_calls(&self) -> usize {
        self.state.lock().feature_calls
    }

    pub fn persisted_styles(&self) -> Vec<(LayerId, FeatureId, StyleRecord)> {
        self.state.lock().persisted_styles.clone()
    }

    pub fn updates(&self) -> Vec<(LayerId, FeatureId, FeatureDraft)> {
        self.state.lock().updates.clone()
    }

    fn find_row<'a>(
        rows: &'a mut [Map<String, Value>],
        feature_id: FeatureId,
    ) -> Option<&'a mut Map<String, Value>> {
        rows.iter_mut().find(|row| {
            row.get("id")
                .and_then(FeatureId::from_json)
                .map_or(false, |id| id == feature_id)
        })
    }
}

impl RemoteGateway for ScriptedGateway {
    async fn list_layers(&self) -> Result<Vec<LayerDescriptor>, GatewayError> {
        Ok(self.layers.clone())
    }

    async fn fetch_layer_features(
        &self,
        layer_id: &LayerId,
    ) -> Result<Vec<RawFeatureRow>, GatewayError> {
        // Rows are read when the request arrives, a held fetch answers with
        // that snapshot.
        let (gate, rows) = {
            let mut state = self.state.lock();
            *state.fetch_calls.entry(layer_id.clone()).or_insert(0) += 1;
            (
                state.gates.get(layer_id).cloned(),
                state.rows.get(layer_id).cloned().unwrap_or_default(),
            )
        };
        if let Some(gate) = gate {
            // Closing the gate is the release signal.
            let _ = gate.acquire().await;
        }
        if self.state.lock().failing.contains(layer_id) {
            return Err(GatewayError::Status {
                endpoint: "load_layer".to_string(),
                status: 500,
            });
        }
        Ok(rows
            .into_iter()
            .map(RawFeatureRow::from_json_object)
            .collect())
    }

    async fn fetch_feature_by_id(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
    ) -> Result<RawFeatureRow, GatewayError> {
        let mut state = self.state.lock();
        state.feature_calls += 1;
        let rows = state.rows.get_mut(layer_id).ok_or_else(|| {
            GatewayError::Rejected(format!("no layer {}", layer_id))
        })?;
        Self::find_row(rows, feature_id)
            .map(|row| RawFeatureRow::from_json_object(row.clone()))
            .ok_or_else(|| GatewayError::Rejected(format!("no feature {}", feature_id)))
    }

    async fn persist_style(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
        style: &StyleRecord,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        if state.reject_persist {
            return Err(GatewayError::Rejected("style update refused".to_string()));
        }
        if let Some(row) = state
            .rows
            .get_mut(layer_id)
            .and_then(|rows| Self::find_row(rows, feature_id))
        {
            row.insert("style".to_string(), Value::from(style.to_json().to_string()));
        }
        state
            .persisted_styles
            .push((layer_id.clone(), feature_id, style.clone()));
        Ok(())
    }

    async fn persist_feature(
        &self,
        layer_id: &LayerId,
        draft: &FeatureDraft,
    ) -> Result<Option<FeatureId>, GatewayError> {
        let mut state = self.state.lock();
        if state.reject_persist {
            return Err(GatewayError::Rejected("insert refused".to_string()));
        }
        let geometry = draft
            .geometry
            .as_ref()
            .ok_or_else(|| GatewayError::Rejected("a new feature needs a geometry".to_string()))?;
        state.next_feature_id += 1;
        let feature_id = FeatureId(state.next_feature_id);
        let mut row = Map::new();
        row.insert("id".to_string(), Value::from(feature_id.0));
        row.insert(
            "geojson".to_string(),
            Value::from(serde_json::to_string(geometry).unwrap_or_default()),
        );
        for (name, value) in &draft.attributes {
            row.insert(name.clone(), Value::from(value.clone()));
        }
        state.rows.entry(layer_id.clone()).or_default().push(row);
        Ok((!state.status_only_saves).then_some(feature_id))
    }

    async fn update_feature(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
        draft: &FeatureDraft,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        if state.reject_persist {
            return Err(GatewayError::Rejected("update refused".to_string()));
        }
        let row = state
            .rows
            .get_mut(layer_id)
            .and_then(|rows| Self::find_row(rows, feature_id))
            .ok_or_else(|| GatewayError::Rejected(format!("no feature {}", feature_id)))?;
        for (name, value) in &draft.attributes {
            row.insert(name.clone(), Value::from(value.clone()));
        }
        state
            .updates
            .push((layer_id.clone(), feature_id, draft.clone()));
        Ok(())
    }
}
