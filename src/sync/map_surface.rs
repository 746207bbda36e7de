use geo::BoundingRect;

use crate::{
    geofile::feature::{FeatureId, LayerId},
    style::{GeometryKind, LineStyle, PointStyle, PolygonStyle, StyleRecord},
};

/// What a click on a rendered feature resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClickTarget {
    pub layer_id: LayerId,
    pub feature_id: FeatureId,
}

/// How one feature is drawn. The style type always matches the geometry class.
#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    Marker {
        geometry: geo::Geometry,
        style: PointStyle,
    },
    Polyline {
        geometry: geo::Geometry,
        style: LineStyle,
    },
    Polygon {
        geometry: geo::Geometry,
        style: PolygonStyle,
    },
}

impl Representation {
    /// Pair a geometry with its resolved style. Returns `None` if the geometry
    /// class is not the one the style was resolved for.
    pub fn build(geometry: &geo::Geometry, style: StyleRecord) -> Option<Self> {
        if GeometryKind::of_geometry(geometry) != Some(style.kind()) {
            return None;
        }
        let geometry = geometry.clone();
        Some(match style {
            StyleRecord::Point(style) => Representation::Marker { geometry, style },
            StyleRecord::Line(style) => Representation::Polyline { geometry, style },
            StyleRecord::Polygon(style) => Representation::Polygon { geometry, style },
        })
    }

    pub fn geometry(&self) -> &geo::Geometry {
        match self {
            Representation::Marker { geometry, .. }
            | Representation::Polyline { geometry, .. }
            | Representation::Polygon { geometry, .. } => geometry,
        }
    }

    pub fn style(&self) -> StyleRecord {
        match self {
            Representation::Marker { style, .. } => StyleRecord::Point(style.clone()),
            Representation::Polyline { style, .. } => StyleRecord::Line(style.clone()),
            Representation::Polygon { style, .. } => StyleRecord::Polygon(style.clone()),
        }
    }

    /// Swap the style in place. A style of another kind is refused.
    pub fn restyle(&mut self, record: &StyleRecord) -> bool {
        match (self, record) {
            (Representation::Marker { style, .. }, StyleRecord::Point(new)) => *style = new.clone(),
            (Representation::Polyline { style, .. }, StyleRecord::Line(new)) => *style = new.clone(),
            (Representation::Polygon { style, .. }, StyleRecord::Polygon(new)) => {
                *style = new.clone()
            }
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFeature {
    pub click: ClickTarget,
    pub representation: Representation,
}

/// Everything the map needs to draw one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedLayer {
    pub layer_id: LayerId,
    pub kind: GeometryKind,
    pub features: Vec<RenderedFeature>,
}

impl RenderedLayer {
    /// Bounds of all features, `None` for an empty layer.
    pub fn bounds(&self) -> Option<geo::Rect> {
        bounds_union(
            self.features
                .iter()
                .filter_map(|feature| feature.representation.geometry().bounding_rect()),
        )
    }
}

pub fn bounds_union(rects: impl IntoIterator<Item = geo::Rect>) -> Option<geo::Rect> {
    rects.into_iter().reduce(|a, b| {
        geo::Rect::new(
            geo::Coord {
                x: a.min().x.min(b.min().x),
                y: a.min().y.min(b.min().y),
            },
            geo::Coord {
                x: a.max().x.max(b.max().x),
                y: a.max().y.max(b.max().y),
            },
        )
    })
}

/// The map the engine draws on.
///
/// A surface owns whatever it creates for a mounted layer and hands back a
/// handle. The engine keeps the handle until it unmounts the layer.
pub trait MapSurface {
    type Handle;

    fn mount(&mut self, layer: RenderedLayer) -> Self::Handle;

    fn unmount(&mut self, layer_id: &LayerId, handle: Self::Handle);

    fn fit_bounds(&mut self, bounds: geo::Rect);

    /// Change the style of one drawn feature without redrawing its layer.
    fn restyle(&mut self, handle: &Self::Handle, feature_id: FeatureId, style: &StyleRecord);
}
