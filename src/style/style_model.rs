use std::fmt;

use serde_json::{Map, Value};

use crate::error::EditError;

/// Geometry class of a layer. Every style lookup matches on this exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
}

impl GeometryKind {
    /// Parse a catalog layer type. Unknown types yield `None` so the caller can
    /// report them instead of guessing a kind.
    pub fn parse(layer_type: &str) -> Option<Self> {
        match layer_type.trim().to_ascii_lowercase().as_str() {
            "point" | "multipoint" => Some(GeometryKind::Point),
            "line" | "linestring" | "multilinestring" => Some(GeometryKind::Line),
            "polygon" | "multipolygon" => Some(GeometryKind::Polygon),
            _ => None,
        }
    }

    /// Geometry class of a parsed geometry. Collections have no single class.
    pub fn of_geometry(geometry: &geo::Geometry) -> Option<Self> {
        match geometry {
            geo::Geometry::Point(_) | geo::Geometry::MultiPoint(_) => Some(GeometryKind::Point),
            geo::Geometry::Line(_)
            | geo::Geometry::LineString(_)
            | geo::Geometry::MultiLineString(_) => Some(GeometryKind::Line),
            geo::Geometry::Polygon(_)
            | geo::Geometry::MultiPolygon(_)
            | geo::Geometry::Rect(_)
            | geo::Geometry::Triangle(_) => Some(GeometryKind::Polygon),
            geo::Geometry::GeometryCollection(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GeometryKind::Point => "point",
            GeometryKind::Line => "line",
            GeometryKind::Polygon => "polygon",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Marker,
    MarkerIcon,
    CircleMarker,
}

impl MarkerKind {
    /// Accepts the stored spellings, including the legacy `markercircle`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "marker" => Some(MarkerKind::Marker),
            "markericon" => Some(MarkerKind::MarkerIcon),
            "circlemarker" | "markercircle" => Some(MarkerKind::CircleMarker),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MarkerKind::Marker => "marker",
            MarkerKind::MarkerIcon => "markerIcon",
            MarkerKind::CircleMarker => "circleMarker",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerShape {
    Circle,
    Square,
    Star,
    Penta,
}

impl MarkerShape {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "circle" => Some(MarkerShape::Circle),
            "square" => Some(MarkerShape::Square),
            "star" => Some(MarkerShape::Star),
            "penta" => Some(MarkerShape::Penta),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MarkerShape::Circle => "circle",
            MarkerShape::Square => "square",
            MarkerShape::Star => "star",
            MarkerShape::Penta => "penta",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointStyle {
    pub marker_kind: MarkerKind,
    pub shape: MarkerShape,
    pub icon: String,
    pub icon_color: String,
    pub radius: f64,
    pub color: String,
    pub fill_color: String,
    pub weight: f64,
    pub fill_opacity: f64,
}

impl Default for PointStyle {
    fn default() -> Self {
        Self {
            marker_kind: MarkerKind::Marker,
            shape: MarkerShape::Circle,
            icon: "fa-map-marker".to_string(),
            icon_color: "red".to_string(),
            radius: 8.0,
            color: "#ffffff".to_string(),
            fill_color: "#ff6b35".to_string(),
            weight: 2.0,
            fill_opacity: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineStyle {
    pub color: String,
    pub weight: f64,
    pub opacity: f64,
    pub dash_pattern: String,
}

impl Default for LineStyle {
    fn default() -> Self {
        Self {
            color: "#3388ff".to_string(),
            weight: 3.0,
            opacity: 1.0,
            dash_pattern: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolygonStyle {
    pub color: String,
    pub fill_color: String,
    pub weight: f64,
    pub opacity: f64,
    pub fill_opacity: f64,
    pub dash_pattern: String,
}

impl Default for PolygonStyle {
    fn default() -> Self {
        Self {
            color: "#3388ff".to_string(),
            fill_color: "#3388ff".to_string(),
            weight: 2.0,
            opacity: 1.0,
            fill_opacity: 0.5,
            dash_pattern: "0".to_string(),
        }
    }
}

/// A fully resolved style, tagged by geometry kind.
#[derive(Debug, Clone, PartialEq)]
pub enum StyleRecord {
    Point(PointStyle),
    Line(LineStyle),
    Polygon(PolygonStyle),
}

impl StyleRecord {
    pub fn kind(&self) -> GeometryKind {
        match self {
            StyleRecord::Point(_) => GeometryKind::Point,
            StyleRecord::Line(_) => GeometryKind::Line,
            StyleRecord::Polygon(_) => GeometryKind::Polygon,
        }
    }

    /// Serialize with the field names used by the feature store.
    pub fn to_json(&self) -> Value {
        PartialStyle::from(self).to_json()
    }
}

/// Style fields as stored with a feature. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialStyle {
    pub marker_kind: Option<MarkerKind>,
    pub shape: Option<MarkerShape>,
    pub icon: Option<String>,
    pub icon_color: Option<String>,
    pub radius: Option<f64>,
    pub color: Option<String>,
    pub fill_color: Option<String>,
    pub weight: Option<f64>,
    pub opacity: Option<f64>,
    pub fill_opacity: Option<f64>,
    pub dash_pattern: Option<String>,
}

fn text_field(object: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| object.get(*name))
        .find_map(|value| match value {
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            _ => None,
        })
}

fn number_field(object: &Map<String, Value>, name: &str) -> Option<f64> {
    let number = match object.get(name)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

impl PartialStyle {
    /// Read a stored style object. Unknown fields and values of the wrong type
    /// are ignored, a non-object yields an empty style.
    pub fn from_json(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        Self {
            marker_kind: text_field(object, &["markerType", "markerKind"])
                .and_then(|text| MarkerKind::parse(&text)),
            shape: text_field(object, &["shape"]).and_then(|text| MarkerShape::parse(&text)),
            icon: text_field(object, &["icon"]),
            icon_color: text_field(object, &["iconColor", "markerColor"]),
            radius: number_field(object, "radius"),
            color: text_field(object, &["color"]),
            fill_color: text_field(object, &["fillColor"]),
            weight: number_field(object, "weight"),
            opacity: number_field(object, "opacity"),
            fill_opacity: number_field(object, "fillOpacity"),
            dash_pattern: text_field(object, &["dashArray", "dashPattern"]),
        }
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_json(&value))
    }

    /// Serialize the present fields with their stored names.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        let mut put = |name: &str, value: Option<Value>| {
            if let Some(value) = value {
                object.insert(name.to_string(), value);
            }
        };
        put(
            "markerType",
            self.marker_kind.map(|kind| Value::from(kind.name())),
        );
        put("shape", self.shape.map(|shape| Value::from(shape.name())));
        put("icon", self.icon.clone().map(Value::from));
        put("iconColor", self.icon_color.clone().map(Value::from));
        put("radius", self.radius.map(Value::from));
        put("color", self.color.clone().map(Value::from));
        put("fillColor", self.fill_color.clone().map(Value::from));
        put("weight", self.weight.map(Value::from));
        put("opacity", self.opacity.map(Value::from));
        put("fillOpacity", self.fill_opacity.map(Value::from));
        put("dashArray", self.dash_pattern.clone().map(Value::from));
        Value::Object(object)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Set one field from an editor value.
    pub fn set(&mut self, field: StyleField, value: StyleValue) -> Result<(), EditError> {
        match field {
            StyleField::MarkerKind => {
                let text = value.into_text(field)?;
                self.marker_kind = Some(MarkerKind::parse(&text).ok_or(EditError::WrongValue {
                    field: field.name().to_string(),
                    expected: "one of marker, markerIcon, circleMarker",
                })?);
            }
            StyleField::Shape => {
                let text = value.into_text(field)?;
                self.shape = Some(MarkerShape::parse(&text).ok_or(EditError::WrongValue {
                    field: field.name().to_string(),
                    expected: "one of circle, square, star, penta",
                })?);
            }
            StyleField::Icon => self.icon = Some(value.into_text(field)?),
            StyleField::IconColor => self.icon_color = Some(value.into_text(field)?),
            StyleField::Radius => self.radius = Some(value.into_number(field)?),
            StyleField::Color => self.color = Some(value.into_text(field)?),
            StyleField::FillColor => self.fill_color = Some(value.into_text(field)?),
            StyleField::Weight => self.weight = Some(value.into_number(field)?),
            StyleField::Opacity => self.opacity = Some(value.into_number(field)?),
            StyleField::FillOpacity => self.fill_opacity = Some(value.into_number(field)?),
            StyleField::DashPattern => self.dash_pattern = Some(value.into_text(field)?),
        }
        Ok(())
    }
}

impl From<&StyleRecord> for PartialStyle {
    fn from(record: &StyleRecord) -> Self {
        match record {
            StyleRecord::Point(style) => Self {
                marker_kind: Some(style.marker_kind),
                shape: Some(style.shape),
                icon: Some(style.icon.clone()),
                icon_color: Some(style.icon_color.clone()),
                radius: Some(style.radius),
                color: Some(style.color.clone()),
                fill_color: Some(style.fill_color.clone()),
                weight: Some(style.weight),
                fill_opacity: Some(style.fill_opacity),
                ..Self::default()
            },
            StyleRecord::Line(style) => Self {
                color: Some(style.color.clone()),
                weight: Some(style.weight),
                opacity: Some(style.opacity),
                dash_pattern: Some(style.dash_pattern.clone()),
                ..Self::default()
            },
            StyleRecord::Polygon(style) => Self {
                color: Some(style.color.clone()),
                fill_color: Some(style.fill_color.clone()),
                weight: Some(style.weight),
                opacity: Some(style.opacity),
                fill_opacity: Some(style.fill_opacity),
                dash_pattern: Some(style.dash_pattern.clone()),
                ..Self::default()
            },
        }
    }
}

/// Editable style fields, named as in the stored style object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleField {
    MarkerKind,
    Shape,
    Icon,
    IconColor,
    Radius,
    Color,
    FillColor,
    Weight,
    Opacity,
    FillOpacity,
    DashPattern,
}

impl StyleField {
    pub fn parse(name: &str) -> Result<Self, EditError> {
        let field = match name.trim() {
            "markerType" | "markerKind" => StyleField::MarkerKind,
            "shape" => StyleField::Shape,
            "icon" => StyleField::Icon,
            "iconColor" | "markerColor" => StyleField::IconColor,
            "radius" => StyleField::Radius,
            "color" => StyleField::Color,
            "fillColor" => StyleField::FillColor,
            "weight" => StyleField::Weight,
            "opacity" => StyleField::Opacity,
            "fillOpacity" => StyleField::FillOpacity,
            "dashArray" | "dashPattern" => StyleField::DashPattern,
            other => return Err(EditError::UnknownField(other.to_string())),
        };
        Ok(field)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StyleField::MarkerKind => "markerType",
            StyleField::Shape => "shape",
            StyleField::Icon => "icon",
            StyleField::IconColor => "iconColor",
            StyleField::Radius => "radius",
            StyleField::Color => "color",
            StyleField::FillColor => "fillColor",
            StyleField::Weight => "weight",
            StyleField::Opacity => "opacity",
            StyleField::FillOpacity => "fillOpacity",
            StyleField::DashPattern => "dashArray",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            StyleField::Radius | StyleField::Weight | StyleField::Opacity | StyleField::FillOpacity
        )
    }

    pub fn applies_to(&self, kind: GeometryKind) -> bool {
        match kind {
            GeometryKind::Point => !matches!(self, StyleField::Opacity | StyleField::DashPattern),
            GeometryKind::Line => matches!(
                self,
                StyleField::Color | StyleField::Weight | StyleField::Opacity | StyleField::DashPattern
            ),
            GeometryKind::Polygon => !matches!(
                self,
                StyleField::MarkerKind
                    | StyleField::Shape
                    | StyleField::Icon
                    | StyleField::IconColor
                    | StyleField::Radius
            ),
        }
    }
}

/// A value entered for a style field.
#[derive(Debug, Clone, PartialEq)]
pub enum StyleValue {
    Text(String),
    Number(f64),
}

impl StyleValue {
    /// Interpret user text for `field`: numeric fields need a number.
    pub fn parse_for(field: StyleField, text: &str) -> Result<Self, EditError> {
        if field.is_numeric() {
            let number = text.trim().parse::<f64>().map_err(|_| EditError::WrongValue {
                field: field.name().to_string(),
                expected: "a number",
            })?;
            Ok(StyleValue::Number(number))
        } else {
            Ok(StyleValue::Text(text.trim().to_string()))
        }
    }

    fn into_text(self, field: StyleField) -> Result<String, EditError> {
        match self {
            StyleValue::Text(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            _ => Err(EditError::WrongValue {
                field: field.name().to_string(),
                expected: "non-empty text",
            }),
        }
    }

    fn into_number(self, field: StyleField) -> Result<f64, EditError> {
        match self {
            StyleValue::Number(number) if number.is_finite() => Ok(number),
            _ => Err(EditError::WrongValue {
                field: field.name().to_string(),
                expected: "a finite number",
            }),
        }
    }
}

impl From<&str> for StyleValue {
    fn from(text: &str) -> Self {
        StyleValue::Text(text.to_string())
    }
}

impl From<f64> for StyleValue {
    fn from(number: f64) -> Self {
        StyleValue::Number(number)
    }
}

fn unit(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(default).clamp(0.0, 1.0)
}

fn non_negative(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(default).max(0.0)
}

fn dash(value: &Option<String>, default: &str) -> String {
    match value.as_deref().map(str::trim) {
        Some(pattern) if !pattern.is_empty() => pattern.to_string(),
        _ => default.to_string(),
    }
}

/// Fill every field of a style for `kind`, taking defaults for anything absent.
///
/// Total and deterministic: `resolve(kind, None)` is the kind's default, and
/// resolving an already resolved record returns it unchanged.
pub fn resolve(kind: GeometryKind, partial: Option<&PartialStyle>) -> StyleRecord {
    let empty = PartialStyle::default();
    let partial = partial.unwrap_or(&empty);
    match kind {
        GeometryKind::Point => {
            let default = PointStyle::default();
            StyleRecord::Point(PointStyle {
                marker_kind: partial.marker_kind.unwrap_or(default.marker_kind),
                shape: partial.shape.unwrap_or(default.shape),
                icon: partial.icon.clone().unwrap_or(default.icon),
                icon_color: partial.icon_color.clone().unwrap_or(default.icon_color),
                radius: non_negative(partial.radius, default.radius),
                color: partial.color.clone().unwrap_or(default.color),
                fill_color: partial.fill_color.clone().unwrap_or(default.fill_color),
                weight: non_negative(partial.weight, default.weight),
                fill_opacity: unit(partial.fill_opacity, default.fill_opacity),
            })
        }
        GeometryKind::Line => {
            let default = LineStyle::default();
            StyleRecord::Line(LineStyle {
                color: partial.color.clone().unwrap_or(default.color),
                weight: non_negative(partial.weight, default.weight),
                opacity: unit(partial.opacity, default.opacity),
                dash_pattern: dash(&partial.dash_pattern, &default.dash_pattern),
            })
        }
        GeometryKind::Polygon => {
            let default = PolygonStyle::default();
            StyleRecord::Polygon(PolygonStyle {
                color: partial.color.clone().unwrap_or(default.color),
                fill_color: partial.fill_color.clone().unwrap_or(default.fill_color),
                weight: non_negative(partial.weight, default.weight),
                opacity: unit(partial.opacity, default.opacity),
                fill_opacity: unit(partial.fill_opacity, default.fill_opacity),
                dash_pattern: dash(&partial.dash_pattern, &default.dash_pattern),
            })
        }
    }
}
