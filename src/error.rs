//! Error types shared by the layer synchronization subsystem.
//!
//! Failures are scoped so that none of them escapes its layer: a
//! `ParseFailure` drops one feature, a `FetchFailure` aborts one layer load,
//! a `PersistFailure` leaves the editor draft in place for a retry.

use thiserror::Error;

use crate::geofile::feature::{FeatureId, LayerId};

/// Errors reported by a remote data gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The request could not be sent or the connection failed.
    #[error("Transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The remote answered with a non-success status.
    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },

    /// The response body could not be decoded.
    #[error("Could not decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// The remote refused the operation.
    #[error("Rejected by remote: {0}")]
    Rejected(String),
}

/// A single feature row that could not be turned into a `FeatureRecord`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseFailure {
    #[error("Row in layer {layer_id} has no usable feature id")]
    MissingId { layer_id: LayerId },

    #[error("Feature {feature_id} in layer {layer_id} has no geometry")]
    MissingGeometry {
        layer_id: LayerId,
        feature_id: FeatureId,
    },

    #[error("Feature {feature_id} in layer {layer_id} has invalid geometry: {reason}")]
    Geometry {
        layer_id: LayerId,
        feature_id: FeatureId,
        reason: String,
    },
}

/// A layer load that did not produce features.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchFailure {
    #[error("Failed to load layer {layer_id}: {source}")]
    Remote {
        layer_id: LayerId,
        source: GatewayError,
    },

    /// The fetch this request was coalesced onto went away without a result.
    #[error("Load of layer {layer_id} was abandoned before it completed")]
    Abandoned { layer_id: LayerId },
}

/// A style or attribute save that the remote did not accept.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistFailure {
    #[error("Saving feature {feature_id} of layer {layer_id} failed: {source}")]
    Feature {
        layer_id: LayerId,
        feature_id: FeatureId,
        source: GatewayError,
    },

    #[error("Creating a feature in layer {layer_id} failed: {source}")]
    Create {
        layer_id: LayerId,
        source: GatewayError,
    },
}

/// Problems in the layer catalog.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Layer {layer_id} has unknown geometry kind '{kind}'")]
    UnknownGeometryKind { layer_id: String, kind: String },

    #[error("Catalog row is missing field '{0}'")]
    MissingField(&'static str),
}

/// Failure to resolve a clicked feature to its authoritative record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("Fetching feature {feature_id} of layer {layer_id} failed: {source}")]
    Fetch {
        layer_id: LayerId,
        feature_id: FeatureId,
        source: GatewayError,
    },

    #[error(transparent)]
    Parse(#[from] ParseFailure),
}

/// Rejected edits in the style editor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error("Field '{field}' does not apply to {kind} styles")]
    NotApplicable { field: String, kind: String },

    #[error("Field '{field}' expects {expected}")]
    WrongValue {
        field: String,
        expected: &'static str,
    },

    #[error("Unknown style field '{0}'")]
    UnknownField(String),
}
