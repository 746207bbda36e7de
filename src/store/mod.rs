pub mod feature_store;

pub use feature_store::{FeatureStore, LayerFeatures, LoadResult, StoreStats};
