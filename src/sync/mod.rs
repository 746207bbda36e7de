pub mod checked;
pub mod engine;
pub mod map_surface;
pub mod notice;
pub mod recording;

pub use checked::CheckedLayerSet;
pub use engine::{LayerEvent, LayerPhase, LayerSyncEngine, ReconcileReport};
pub use map_surface::{ClickTarget, MapSurface, RenderedFeature, RenderedLayer, Representation};
pub use recording::{RecordingSurface, SurfaceCall};
