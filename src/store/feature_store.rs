//! Per-layer feature cache with request coalescing.
//!
//! At most one fetch per layer is outstanding at any time. A request for a
//! layer that is already being fetched subscribes to the running fetch
//! instead of starting another one:
//!
//! ```text
//! ensure_loaded(A) ─┐
//!                   ├──► in flight: A ──► fetch_layer_features(A) ──► parse ──► cache
//! ensure_loaded(A) ─┘         │                                          │
//!                             └──────────── broadcast result ◄───────────┘
//! ```
//!
//! Evicting a layer drops its cached features. A fetch that is still running
//! when its layer is evicted completes normally for its waiters, but its result
//! is not cached.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::{
    error::{FetchFailure, LookupError},
    gateway::RemoteGateway,
    geofile::feature::{parse_rows, FeatureId, FeatureRecord, LayerId},
};

/// Features of one layer, shared between the cache and its readers.
pub type LayerFeatures = Arc<Vec<FeatureRecord>>;

pub type LoadResult = Result<LayerFeatures, FetchFailure>;

struct InFlight {
    sender: broadcast::Sender<LoadResult>,
    /// Set when the layer was evicted while this fetch was running.
    evicted: bool,
}

/// Counters for monitoring how often requests are served without a fetch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub coalesced_requests: u64,
    pub fetches: u64,
}

#[derive(Default)]
struct StoreState {
    cache: HashMap<LayerId, LayerFeatures>,
    in_flight: HashMap<LayerId, InFlight>,
    stats: StoreStats,
}

enum Registration {
    Cached(LayerFeatures),
    Coalesced(broadcast::Receiver<LoadResult>),
    Leader(FetchGuard),
}

pub struct FeatureStore<G: RemoteGateway> {
    gateway: Arc<G>,
    state: Arc<Mutex<StoreState>>,
}

/// Owned by the request that performs the fetch. If that request is dropped
/// before completing, the in-flight entry is removed so that waiters see a
/// closed channel instead of hanging.
struct FetchGuard {
    state: Arc<Mutex<StoreState>>,
    layer_id: LayerId,
    completed: bool,
}

impl FetchGuard {
    fn complete(mut self, result: &LoadResult) {
        self.completed = true;
        let mut state = self.state.lock();
        let Some(in_flight) = state.in_flight.remove(&self.layer_id) else {
            return;
        };
        match result {
            Ok(features) if !in_flight.evicted => {
                state.cache.insert(self.layer_id.clone(), Arc::clone(features));
            }
            Ok(_) => log::debug!(
                "Layer {} was evicted while loading, not caching the result",
                self.layer_id
            ),
            Err(_) => {}
        }
        // Waiters may have gone away, which is fine.
        let waiters = in_flight.sender.receiver_count();
        let _ = in_flight.sender.send(result.clone());
        if waiters > 0 {
            log::debug!(
                "Sent result for layer {} to {} coalesced waiters",
                self.layer_id,
                waiters
            );
        }
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if !self.completed {
            log::warn!("Load of layer {} was dropped before completing", self.layer_id);
            self.state.lock().in_flight.remove(&self.layer_id);
        }
    }
}

impl<G: RemoteGateway> FeatureStore<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    fn register(&self, layer_id: &LayerId) -> Registration {
        let mut state = self.state.lock();
        state.stats.total_requests += 1;
        if let Some(features) = state.cache.get(layer_id).cloned() {
            state.stats.cache_hits += 1;
            return Registration::Cached(features);
        }
        if let Some(in_flight) = state.in_flight.get_mut(layer_id) {
            // Asked for again, so the result is wanted after all.
            in_flight.evicted = false;
            let receiver = in_flight.sender.subscribe();
            state.stats.coalesced_requests += 1;
            log::debug!("Coalescing request for layer {} onto running fetch", layer_id);
            return Registration::Coalesced(receiver);
        }
        let (sender, _) = broadcast::channel(1);
        state.in_flight.insert(
            layer_id.clone(),
            InFlight {
                sender,
                evicted: false,
            },
        );
        state.stats.fetches += 1;
        Registration::Leader(FetchGuard {
            state: Arc::clone(&self.state),
            layer_id: layer_id.clone(),
            completed: false,
        })
    }

    /// Features of `layer_id`, fetching them only if neither cached nor
    /// already being fetched. Rows that fail to parse are dropped.
    pub async fn ensure_loaded(&self, layer_id: &LayerId) -> LoadResult {
        match self.register(layer_id) {
            Registration::Cached(features) => Ok(features),
            Registration::Coalesced(mut receiver) => {
                receiver
                    .recv()
                    .await
                    .unwrap_or_else(|_| {
                        Err(FetchFailure::Abandoned {
                            layer_id: layer_id.clone(),
                        })
                    })
            }
            Registration::Leader(guard) => {
                log::info!("Fetching features of layer {}", layer_id);
                let result = match self.gateway.fetch_layer_features(layer_id).await {
                    Ok(rows) => Ok(Arc::new(parse_rows(layer_id, rows))),
                    Err(source) => Err(FetchFailure::Remote {
                        layer_id: layer_id.clone(),
                        source,
                    }),
                };
                guard.complete(&result);
                result
            }
        }
    }

    /// Drop the cached features of `layer_id`. Returns whether anything was
    /// cached or in flight.
    pub fn evict(&self, layer_id: &LayerId) -> bool {
        let mut state = self.state.lock();
        let cached = state.cache.remove(layer_id).is_some();
        let in_flight = match state.in_flight.get_mut(layer_id) {
            Some(in_flight) => {
                in_flight.evicted = true;
                true
            }
            None => false,
        };
        if cached || in_flight {
            log::debug!("Evicted layer {}", layer_id);
        }
        cached || in_flight
    }

    pub fn cached(&self, layer_id: &LayerId) -> Option<LayerFeatures> {
        self.state.lock().cache.get(layer_id).cloned()
    }

    pub fn is_loading(&self, layer_id: &LayerId) -> bool {
        self.state.lock().in_flight.contains_key(layer_id)
    }

    pub fn stats(&self) -> StoreStats {
        self.state.lock().stats
    }

    /// Fetch the authoritative version of one feature. The cache is not touched.
    pub async fn fetch_feature(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
    ) -> Result<FeatureRecord, LookupError> {
        let row = self
            .gateway
            .fetch_feature_by_id(layer_id, feature_id)
            .await
            .map_err(|source| LookupError::Fetch {
                layer_id: layer_id.clone(),
                feature_id,
                source,
            })?;
        Ok(FeatureRecord::try_from_row(layer_id, row)?)
    }

    /// Replace a cached feature in place. Returns false if the layer is not
    /// cached or does not hold that feature.
    pub fn replace_feature(&self, record: FeatureRecord) -> bool {
        let mut state = self.state.lock();
        let Some(features) = state.cache.get_mut(&record.layer_id) else {
            return false;
        };
        let features = Arc::make_mut(features);
        match features
            .iter_mut()
            .find(|feature| feature.feature_id == record.feature_id)
        {
            Some(feature) => {
                *feature = record;
                true
            }
            None => false,
        }
    }
}
