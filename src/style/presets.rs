/// A selectable value with a human readable label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub value: &'static str,
    pub label: &'static str,
}

const fn preset(value: &'static str, label: &'static str) -> Preset {
    Preset { value, label }
}

/// Dash patterns offered for lines and polygon outlines. `"0"` is a solid stroke.
pub const LINE_DASH_PRESETS: [Preset; 5] = [
    preset("0", "Solid"),
    preset("5,5", "Dashed 1"),
    preset("10,5", "Dashed 2"),
    preset("15,5", "Dashed 3"),
    preset("20,5,5,5", "Dash-dot"),
];

/// Marker colours understood by the icon marker renderer.
pub const COLOR_PRESETS: [Preset; 14] = [
    preset("red", "Red"),
    preset("orange-dark", "Dark orange"),
    preset("orange", "Orange"),
    preset("yellow", "Yellow"),
    preset("blue-dark", "Dark blue"),
    preset("cyan", "Cyan"),
    preset("purple", "Dark purple"),
    preset("violet", "Violet"),
    preset("pink", "Pink"),
    preset("green-dark", "Dark green"),
    preset("green", "Green"),
    preset("green-light", "Light green"),
    preset("black", "Black"),
    preset("white", "White"),
];

/// Icon names available for icon markers.
pub const ICON_PRESETS: [&str; 42] = [
    "fa-home",
    "fa-building",
    "fa-bed",
    "fa-university",
    "fa-hospital-o",
    "fa-ambulance",
    "fa-subway",
    "fa-train",
    "fa-plane",
    "fa-taxi",
    "fa-tree",
    "fa-archive",
    "fa-coffee",
    "fa-cutlery",
    "fa-glass",
    "fa-beer",
    "fa-shopping-cart",
    "fa-shopping-bag",
    "fa-shopping-basket",
    "fa-bicycle",
    "fa-bus",
    "fa-motorcycle",
    "fa-road",
    "fa-ship",
    "fa-spoon",
    "fa-fort-awesome",
    "fa-car",
    "fa-map-marker",
    "fa-map",
    "fa-compass",
    "fa-globe",
    "fa-anchor",
    "fa-industry",
    "fa-graduation-cap",
    "fa-life-ring",
    "fa-heart",
    "fa-hotel",
    "fa-map-pin",
    "fa-map-signs",
    "fa-paw",
    "fa-suitcase",
    "fa-ticket",
];

/// Label of a dash pattern, if it is one of the presets.
pub fn dash_label(pattern: &str) -> Option<&'static str> {
    LINE_DASH_PRESETS
        .iter()
        .find(|preset| preset.value == pattern)
        .map(|preset| preset.label)
}

pub fn is_color_preset(color: &str) -> bool {
    COLOR_PRESETS.iter().any(|preset| preset.value == color)
}
