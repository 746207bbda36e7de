use std::future::Future;

use crate::{
    error::GatewayError,
    geofile::feature::{FeatureDraft, FeatureId, LayerDescriptor, LayerId, RawFeatureRow},
    style::StyleRecord,
};

/// Remote operations the layer engine depends on.
///
/// Implementations must be shareable across tasks: loads run on spawned Tokio
/// tasks that hold the gateway through an `Arc`.
pub trait RemoteGateway: Send + Sync + 'static {
    /// Fetch the layer catalog.
    fn list_layers(&self) -> impl Future<Output = Result<Vec<LayerDescriptor>, GatewayError>> + Send;

    /// Fetch every feature row of a layer.
    fn fetch_layer_features(
        &self,
        layer_id: &LayerId,
    ) -> impl Future<Output = Result<Vec<RawFeatureRow>, GatewayError>> + Send;

    /// Fetch a single feature row.
    fn fetch_feature_by_id(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
    ) -> impl Future<Output = Result<RawFeatureRow, GatewayError>> + Send;

    /// Store the style of one feature.
    fn persist_style(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
        style: &StyleRecord,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Create a feature. Returns the new id when the portal reports one.
    fn persist_feature(
        &self,
        layer_id: &LayerId,
        draft: &FeatureDraft,
    ) -> impl Future<Output = Result<Option<FeatureId>, GatewayError>> + Send;

    /// Update the attributes (and optionally the geometry) of a feature.
    fn update_feature(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
        draft: &FeatureDraft,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}
