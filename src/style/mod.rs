//! Symbology for point, line and polygon features.
pub mod presets;
pub mod style_model;

pub use style_model::{
    resolve, GeometryKind, LineStyle, MarkerKind, MarkerShape, PartialStyle, PointStyle,
    PolygonStyle, StyleField, StyleRecord, StyleValue,
};
