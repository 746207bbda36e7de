pub mod attribute_editor;
pub mod style_editor;

pub use attribute_editor::AttributeEditor;
pub use style_editor::{StyleEditor, StyleTarget};
