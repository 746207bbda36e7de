//! Gateway speaking the portal's JSON-over-POST `/api` endpoints.

use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::{
    config::GatewayConfig,
    error::{CatalogError, GatewayError},
    geofile::feature::{FeatureDraft, FeatureId, LayerDescriptor, LayerId, RawFeatureRow},
    style::{GeometryKind, StyleRecord},
};

use super::remote::RemoteGateway;

const DEFAULT_USER_AGENT: &str = "layer-sync";

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(
                config
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            )
            .build()
            .map_err(|err| GatewayError::Transport {
                endpoint: config.base_url.clone(),
                message: format!("Failed to create HTTP client: {}", err),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/api/{}", self.base_url, name)
    }

    async fn post(&self, name: &str, body: Value) -> Result<Value, GatewayError> {
        let url = self.endpoint(name);
        log::debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| GatewayError::Transport {
                endpoint: name.to_string(),
                message: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                endpoint: name.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| GatewayError::Decode {
                endpoint: name.to_string(),
                message: err.to_string(),
            })
    }
}

fn decode_error(endpoint: &str, message: &str) -> GatewayError {
    GatewayError::Decode {
        endpoint: endpoint.to_string(),
        message: message.to_string(),
    }
}

/// Expect a JSON array of objects.
fn objects(endpoint: &str, value: Value) -> Result<Vec<Map<String, Value>>, GatewayError> {
    let Value::Array(items) = value else {
        return Err(decode_error(endpoint, "expected an array of rows"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(object) => Ok(object),
            _ => Err(decode_error(endpoint, "expected every row to be an object")),
        })
        .collect()
}

fn string_field(row: &Map<String, Value>, name: &'static str) -> Result<String, CatalogError> {
    match row.get(name) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err(CatalogError::MissingField(name)),
    }
}

/// Turn a catalog row (`formid`, `layername`, `layertype`, `division`) into a descriptor.
pub fn descriptor_from_row(row: &Map<String, Value>) -> Result<LayerDescriptor, CatalogError> {
    let layer_id = string_field(row, "formid")?;
    let layer_type = string_field(row, "layertype")?;
    let geometry_kind =
        GeometryKind::parse(&layer_type).ok_or_else(|| CatalogError::UnknownGeometryKind {
            layer_id: layer_id.clone(),
            kind: layer_type.clone(),
        })?;
    let display_name = string_field(row, "layername").unwrap_or_else(|_| layer_id.clone());
    Ok(LayerDescriptor {
        id: LayerId(layer_id),
        geometry_kind,
        display_name,
        division: string_field(row, "division").ok(),
    })
}

/// Encode attribute values the way the portal expects them: a JSON string
/// holding `[{"name": column, "value": value}, ...]`.
fn encode_attributes(draft: &FeatureDraft) -> String {
    let entries: Vec<Value> = draft
        .attributes
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    Value::Array(entries).to_string()
}

fn encode_geometry(endpoint: &str, geometry: &geojson::Geometry) -> Result<String, GatewayError> {
    serde_json::to_string(geometry).map_err(|err| GatewayError::Rejected(format!(
        "{}: geometry could not be serialized: {}",
        endpoint, err
    )))
}

/// The portal answers `save_layer` with `{"status": "saved"}`; newer
/// deployments add the `id` of the inserted row.
fn created_feature_id(response: &Value) -> Option<FeatureId> {
    response.get("id").and_then(FeatureId::from_json)
}

impl RemoteGateway for HttpGateway {
    async fn list_layers(&self) -> Result<Vec<LayerDescriptor>, GatewayError> {
        let rows = objects("list_layer", self.post("list_layer", json!({})).await?)?;
        let num_rows = rows.len();
        let layers: Vec<LayerDescriptor> = rows
            .iter()
            .filter_map(|row| match descriptor_from_row(row) {
                Ok(descriptor) => Some(descriptor),
                Err(err) => {
                    log::error!("Skipping catalog entry: {}", err);
                    None
                }
            })
            .collect();
        if layers.len() != num_rows {
            log::warn!(
                "Out of {} catalog entries, only {} are usable layers.",
                num_rows,
                layers.len()
            );
        }
        Ok(layers)
    }

    async fn fetch_layer_features(
        &self,
        layer_id: &LayerId,
    ) -> Result<Vec<RawFeatureRow>, GatewayError> {
        let response = self
            .post("load_layer", json!({ "formid": layer_id.as_str() }))
            .await?;
        Ok(objects("load_layer", response)?
            .into_iter()
            .map(RawFeatureRow::from_json_object)
            .collect())
    }

    async fn fetch_feature_by_id(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
    ) -> Result<RawFeatureRow, GatewayError> {
        let response = self
            .post(
                "load_layer_by_id",
                json!({ "formid": layer_id.as_str(), "id": feature_id.0 }),
            )
            .await?;
        objects("load_layer_by_id", response)?
            .into_iter()
            .next()
            .map(RawFeatureRow::from_json_object)
            .ok_or_else(|| {
                GatewayError::Rejected(format!(
                    "feature {} not found in layer {}",
                    feature_id, layer_id
                ))
            })
    }

    async fn persist_style(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
        style: &StyleRecord,
    ) -> Result<(), GatewayError> {
        self.post(
            "update_style",
            json!({
                "formid": layer_id.as_str(),
                "layerid": feature_id.0,
                "layerstyle": style.to_json().to_string(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn persist_feature(
        &self,
        layer_id: &LayerId,
        draft: &FeatureDraft,
    ) -> Result<Option<FeatureId>, GatewayError> {
        let geometry = draft
            .geometry
            .as_ref()
            .ok_or_else(|| GatewayError::Rejected("a new feature needs a geometry".to_string()))?;
        let response = self
            .post(
                "save_layer",
                json!({
                    "formid": layer_id.as_str(),
                    "geojson": encode_geometry("save_layer", geometry)?,
                    "dataarr": encode_attributes(draft),
                }),
            )
            .await?;
        Ok(created_feature_id(&response))
    }

    async fn update_feature(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
        draft: &FeatureDraft,
    ) -> Result<(), GatewayError> {
        let mut body = json!({
            "formid": layer_id.as_str(),
            "id": feature_id.0,
            "dataarr": encode_attributes(draft),
        });
        if let (Some(geometry), Some(object)) = (draft.geometry.as_ref(), body.as_object_mut()) {
            object.insert(
                "geojson".to_string(),
                Value::from(encode_geometry("update_layer", geometry)?),
            );
        }
        self.post("update_layer", body).await?;
        Ok(())
    }
}
