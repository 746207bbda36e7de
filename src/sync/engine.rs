//! Keeps the layers drawn on a map surface in line with the checked layers.
//!
//! Every change of the checked set runs a reconciliation pass:
//!
//! ```text
//!   checked set ──┐
//!                 ├─► diff ─► unmount removed (and evict) ─► start loads for added
//!   rendered   ───┘                                               │
//!                                                                 ▼
//!   mount if still checked ◄── apply completion ◄── completion channel
//! ```
//!
//! Loads run on spawned tasks and report back through a channel. A load is
//! only mounted if its layer is still checked when the result is applied,
//! no matter in which order results arrive.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use tokio::sync::{mpsc, watch};

use crate::{
    error::{FetchFailure, LookupError},
    gateway::RemoteGateway,
    geofile::feature::{FeatureId, FeatureRecord, LayerDescriptor, LayerId},
    store::{FeatureStore, LoadResult},
    style::{resolve, GeometryKind, PartialStyle, StyleRecord},
};

use super::{
    checked::CheckedLayerSet,
    map_surface::{ClickTarget, MapSurface, RenderedFeature, RenderedLayer, Representation},
    notice::{Notice, NoticeBoard},
};

/// Where a layer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPhase {
    Unmounted,
    /// Waiting for the load with this ticket.
    Loading { ticket: u64 },
    Mounted,
    /// Held while the surface removes the layer.
    Unmounting,
}

/// Outcome of applying one load completion.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerEvent {
    Mounted { layer_id: LayerId, features: usize },
    /// The layer was unchecked before its load finished. Nothing was mounted.
    Superseded { layer_id: LayerId },
    Failed {
        layer_id: LayerId,
        error: FetchFailure,
    },
    /// The load was forgotten by `clear` before it finished.
    Stale { layer_id: LayerId },
    /// A refresh was requested while the load ran. Its result was dropped
    /// and the layer is loading again.
    Reloading { layer_id: LayerId },
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub unmounted: Vec<LayerId>,
    pub started: Vec<LayerId>,
}

struct LoadCompletion {
    layer_id: LayerId,
    ticket: u64,
    result: LoadResult,
}

struct MountedLayer<H> {
    handle: H,
    kind: GeometryKind,
    /// Stored style of every drawn feature, `None` where the feature has none.
    own_styles: BTreeMap<FeatureId, Option<PartialStyle>>,
}

/// Owns the checked layer set and the table of mounted layers.
///
/// Loads are spawned with `tokio::spawn`, so the engine must be driven from
/// inside a Tokio runtime.
pub struct LayerSyncEngine<G: RemoteGateway, S: MapSurface> {
    store: Arc<FeatureStore<G>>,
    surface: S,
    checked: CheckedLayerSet,
    phases: HashMap<LayerId, LayerPhase>,
    rendered: HashMap<LayerId, MountedLayer<S::Handle>>,
    failed: HashSet<LayerId>,
    /// Loading layers whose current load predates a refresh.
    refresh_pending: HashSet<LayerId>,
    ever_mounted: HashSet<LayerId>,
    layer_defaults: HashMap<LayerId, PartialStyle>,
    notices: NoticeBoard,
    completion_sender: mpsc::UnboundedSender<LoadCompletion>,
    completions: mpsc::UnboundedReceiver<LoadCompletion>,
    next_ticket: u64,
}

impl<G: RemoteGateway, S: MapSurface> LayerSyncEngine<G, S> {
    pub fn new(store: Arc<FeatureStore<G>>, surface: S) -> Self {
        let (completion_sender, completions) = mpsc::unbounded_channel();
        Self {
            store,
            surface,
            checked: CheckedLayerSet::new(),
            phases: HashMap::new(),
            rendered: HashMap::new(),
            failed: HashSet::new(),
            refresh_pending: HashSet::new(),
            ever_mounted: HashSet::new(),
            layer_defaults: HashMap::new(),
            notices: NoticeBoard::default(),
            completion_sender,
            completions,
            next_ticket: 0,
        }
    }

    pub fn store(&self) -> &Arc<FeatureStore<G>> {
        &self.store
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn checked(&self) -> &CheckedLayerSet {
        &self.checked
    }

    pub fn phase(&self, layer_id: &LayerId) -> LayerPhase {
        self.phases
            .get(layer_id)
            .copied()
            .unwrap_or(LayerPhase::Unmounted)
    }

    pub fn is_loading(&self, layer_id: &LayerId) -> bool {
        matches!(self.phase(layer_id), LayerPhase::Loading { .. })
    }

    pub fn has_pending_loads(&self) -> bool {
        self.phases
            .values()
            .any(|phase| matches!(phase, LayerPhase::Loading { .. }))
    }

    /// Ids of the mounted layers, sorted.
    pub fn rendered_layers(&self) -> Vec<LayerId> {
        let mut ids: Vec<LayerId> = self.rendered.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_failed(&self, layer_id: &LayerId) -> bool {
        self.failed.contains(layer_id)
    }

    pub fn notices(&self) -> &[Notice] {
        self.notices.notices()
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        self.notices.dismiss(id)
    }

    /// Flip one layer and reconcile.
    pub fn toggle(&mut self, layer: &LayerDescriptor) -> ReconcileReport {
        let checked = self.checked.toggle(layer);
        log::debug!(
            "Layer {} {}",
            layer.id,
            if checked { "checked" } else { "unchecked" }
        );
        self.reconcile()
    }

    /// Replace the whole checked set and reconcile.
    pub fn set_checked(&mut self, checked: CheckedLayerSet) -> ReconcileReport {
        self.checked = checked;
        self.reconcile()
    }

    /// Make the mounted layers follow the checked set. Removals are applied
    /// before any load starts. Running it again without changes does nothing.
    pub fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let mut to_remove: Vec<LayerId> = self
            .rendered
            .keys()
            .filter(|layer_id| !self.checked.contains(layer_id))
            .cloned()
            .collect();
        to_remove.sort();
        for layer_id in to_remove {
            self.unmount_layer(&layer_id);
            report.unmounted.push(layer_id);
        }

        // Unchecking a failed layer forgets the failure.
        let checked = &self.checked;
        self.failed.retain(|layer_id| checked.contains(layer_id));

        let to_add: Vec<LayerId> = self
            .checked
            .ids()
            .filter(|layer_id| {
                !self.rendered.contains_key(*layer_id)
                    && !self.is_loading(layer_id)
                    && !self.failed.contains(*layer_id)
            })
            .cloned()
            .collect();
        for layer_id in to_add {
            self.start_load(layer_id.clone());
            report.started.push(layer_id);
        }
        report
    }

    /// Load a failed layer again on the next pass.
    pub fn retry(&mut self, layer_id: &LayerId) -> ReconcileReport {
        if self.failed.remove(layer_id) {
            log::info!("Retrying layer {}", layer_id);
        }
        self.reconcile()
    }

    /// Drop the cached features of a layer and load it again, e.g. after a
    /// feature was added to it.
    ///
    /// A layer that is already loading is loaded once more when the running
    /// load completes, since that load may have read the layer too early.
    pub fn refresh_layer(&mut self, layer_id: &LayerId) -> ReconcileReport {
        if self.is_loading(layer_id) {
            log::debug!(
                "Layer {} is loading, it will be reloaded once the load completes",
                layer_id
            );
            self.store.evict(layer_id);
            self.refresh_pending.insert(layer_id.clone());
            return ReconcileReport::default();
        }
        let mut report = ReconcileReport::default();
        if self.rendered.contains_key(layer_id) {
            self.unmount_layer(layer_id);
            report.unmounted.push(layer_id.clone());
        } else {
            self.store.evict(layer_id);
        }
        self.failed.remove(layer_id);
        let next = self.reconcile();
        report.unmounted.extend(next.unmounted);
        report.started.extend(next.started);
        report
    }

    /// Uncheck and unmount everything. Loads still running are forgotten and
    /// their results reported as stale.
    pub fn clear(&mut self) {
        self.checked = CheckedLayerSet::new();
        self.reconcile();
        for (layer_id, _) in self.phases.drain() {
            self.store.evict(&layer_id);
        }
        self.failed.clear();
        self.refresh_pending.clear();
    }

    /// Apply the next load completion. Returns `None` when nothing is loading.
    pub async fn next_event(&mut self) -> Option<LayerEvent> {
        if !self.has_pending_loads() {
            return None;
        }
        let completion = self.completions.recv().await?;
        Some(self.apply_completion(completion))
    }

    /// Apply completions until no layer is loading.
    ///
    /// A fetch that never returns keeps its layer loading, and this never
    /// returns either.
    pub async fn settle(&mut self) -> Vec<LayerEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    /// Reconcile on every checked set published on `intents`, applying load
    /// completions in between. Returns once the sender is gone and all loads
    /// have settled.
    pub async fn follow(&mut self, mut intents: watch::Receiver<CheckedLayerSet>) -> Vec<LayerEvent> {
        let initial = intents.borrow_and_update().clone();
        self.set_checked(initial);
        let mut events = Vec::new();
        loop {
            tokio::select! {
                changed = intents.changed() => match changed {
                    Ok(()) => {
                        let checked = intents.borrow_and_update().clone();
                        self.set_checked(checked);
                    }
                    Err(_) => break,
                },
                Some(completion) = self.completions.recv() => {
                    events.push(self.apply_completion(completion));
                }
            }
        }
        let last = intents.borrow().clone();
        if last != self.checked {
            self.set_checked(last);
        }
        events.extend(self.settle().await);
        events
    }

    fn start_load(&mut self, layer_id: LayerId) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.phases
            .insert(layer_id.clone(), LayerPhase::Loading { ticket });
        let store = Arc::clone(&self.store);
        let sender = self.completion_sender.clone();
        tokio::spawn(async move {
            let result = store.ensure_loaded(&layer_id).await;
            // The engine may have been dropped in the meantime.
            let _ = sender.send(LoadCompletion {
                layer_id,
                ticket,
                result,
            });
        });
    }

    fn apply_completion(&mut self, completion: LoadCompletion) -> LayerEvent {
        let LoadCompletion {
            layer_id,
            ticket,
            result,
        } = completion;
        match self.phases.get(&layer_id) {
            Some(LayerPhase::Loading { ticket: current }) if *current == ticket => {}
            _ => {
                log::debug!("Ignoring stale load of layer {}", layer_id);
                if !self.checked.contains(&layer_id) && !self.rendered.contains_key(&layer_id) {
                    self.store.evict(&layer_id);
                }
                return LayerEvent::Stale { layer_id };
            }
        }
        self.phases.remove(&layer_id);
        let reload = self.refresh_pending.remove(&layer_id);

        let Some(kind) = self.checked.kind_of(&layer_id) else {
            log::debug!(
                "Layer {} was unchecked while loading, discarding the result",
                layer_id
            );
            self.store.evict(&layer_id);
            return LayerEvent::Superseded { layer_id };
        };

        if reload {
            log::debug!("Reloading layer {} after a refresh", layer_id);
            self.store.evict(&layer_id);
            self.start_load(layer_id.clone());
            return LayerEvent::Reloading { layer_id };
        }

        match result {
            Ok(features) => {
                let count = self.mount_layer(&layer_id, kind, &features);
                LayerEvent::Mounted {
                    layer_id,
                    features: count,
                }
            }
            Err(error) => {
                log::error!("{}", error);
                self.failed.insert(layer_id.clone());
                self.notices.push(
                    layer_id.clone(),
                    format!("Layer {} could not be loaded: {}", layer_id, error),
                );
                LayerEvent::Failed { layer_id, error }
            }
        }
    }

    fn mount_layer(
        &mut self,
        layer_id: &LayerId,
        kind: GeometryKind,
        features: &[FeatureRecord],
    ) -> usize {
        let layer_default = self.layer_defaults.get(layer_id);
        let mut own_styles = BTreeMap::new();
        let mut drawn = Vec::with_capacity(features.len());
        for record in features {
            let style = resolve(kind, record.style.as_ref().or(layer_default));
            match Representation::build(&record.geometry, style) {
                Some(representation) => {
                    own_styles.insert(record.feature_id, record.style.clone());
                    drawn.push(RenderedFeature {
                        click: ClickTarget {
                            layer_id: layer_id.clone(),
                            feature_id: record.feature_id,
                        },
                        representation,
                    });
                }
                None => log::warn!(
                    "Not drawing feature {} of {} layer {}, its geometry has another class",
                    record.feature_id,
                    kind,
                    layer_id
                ),
            }
        }
        let layer = RenderedLayer {
            layer_id: layer_id.clone(),
            kind,
            features: drawn,
        };
        let count = layer.features.len();
        let bounds = if self.ever_mounted.insert(layer_id.clone()) {
            layer.bounds()
        } else {
            None
        };

        let handle = self.surface.mount(layer);
        log::info!("Mounted layer {} with {} features", layer_id, count);
        self.rendered.insert(
            layer_id.clone(),
            MountedLayer {
                handle,
                kind,
                own_styles,
            },
        );
        self.phases.insert(layer_id.clone(), LayerPhase::Mounted);
        if let Some(bounds) = bounds {
            self.surface.fit_bounds(bounds);
        }
        count
    }

    fn unmount_layer(&mut self, layer_id: &LayerId) {
        let Some(mounted) = self.rendered.remove(layer_id) else {
            return;
        };
        self.phases
            .insert(layer_id.clone(), LayerPhase::Unmounting);
        self.surface.unmount(layer_id, mounted.handle);
        self.phases.remove(layer_id);
        self.store.evict(layer_id);
        log::info!("Unmounted layer {}", layer_id);
    }

    /// Fetch the authoritative record behind a clicked feature.
    pub async fn resolve_click(&self, target: &ClickTarget) -> Result<FeatureRecord, LookupError> {
        self.store
            .fetch_feature(&target.layer_id, target.feature_id)
            .await
    }

    /// The style a mounted feature is currently drawn with.
    pub fn feature_style(&self, layer_id: &LayerId, feature_id: FeatureId) -> Option<StyleRecord> {
        let mounted = self.rendered.get(layer_id)?;
        let own = mounted.own_styles.get(&feature_id)?;
        Some(resolve(
            mounted.kind,
            own.as_ref().or(self.layer_defaults.get(layer_id)),
        ))
    }

    /// Stored style of a mounted feature. The outer `None` means the feature
    /// is not drawn.
    pub fn own_style(&self, layer_id: &LayerId, feature_id: FeatureId) -> Option<Option<&PartialStyle>> {
        self.rendered
            .get(layer_id)?
            .own_styles
            .get(&feature_id)
            .map(Option::as_ref)
    }

    /// Geometry kind of a mounted layer.
    pub fn layer_kind(&self, layer_id: &LayerId) -> Option<GeometryKind> {
        self.rendered.get(layer_id).map(|mounted| mounted.kind)
    }

    /// Give a mounted feature a new stored style and redraw it in place.
    /// Returns the style it is now drawn with, or `None` if it is not drawn.
    pub fn apply_style(
        &mut self,
        layer_id: &LayerId,
        feature_id: FeatureId,
        style: Option<PartialStyle>,
    ) -> Option<StyleRecord> {
        self.update_cached_style(layer_id, feature_id, &style);
        let layer_default = self.layer_defaults.get(layer_id);
        let mounted = self.rendered.get_mut(layer_id)?;
        let own = mounted.own_styles.get_mut(&feature_id)?;
        let resolved = resolve(mounted.kind, style.as_ref().or(layer_default));
        *own = style;
        self.surface.restyle(&mounted.handle, feature_id, &resolved);
        Some(resolved)
    }

    fn update_cached_style(
        &self,
        layer_id: &LayerId,
        feature_id: FeatureId,
        style: &Option<PartialStyle>,
    ) {
        let Some(features) = self.store.cached(layer_id) else {
            return;
        };
        if let Some(record) = features
            .iter()
            .find(|record| record.feature_id == feature_id && record.style != *style)
        {
            let mut record = record.clone();
            record.style = style.clone();
            self.store.replace_feature(record);
        }
    }

    pub fn layer_default(&self, layer_id: &LayerId) -> Option<&PartialStyle> {
        self.layer_defaults.get(layer_id)
    }

    /// Set the style used for features of `layer_id` that have none of their
    /// own, for the rest of the session. Returns how many drawn features
    /// were restyled.
    pub fn set_layer_default(&mut self, layer_id: &LayerId, style: Option<PartialStyle>) -> usize {
        match style {
            Some(style) => {
                self.layer_defaults.insert(layer_id.clone(), style);
            }
            None => {
                self.layer_defaults.remove(layer_id);
            }
        }
        let Some(mounted) = self.rendered.get(layer_id) else {
            return 0;
        };
        let resolved = resolve(mounted.kind, self.layer_defaults.get(layer_id));
        let mut restyled = 0;
        for (feature_id, own) in &mounted.own_styles {
            if own.is_none() {
                self.surface.restyle(&mounted.handle, *feature_id, &resolved);
                restyled += 1;
            }
        }
        log::debug!(
            "Restyled {} features of layer {} with the layer default",
            restyled,
            layer_id
        );
        restyled
    }

    /// Put an authoritative record into the cache and redraw its style if it
    /// changed.
    pub fn replace_feature(&mut self, record: FeatureRecord) -> bool {
        let layer_id = record.layer_id.clone();
        let feature_id = record.feature_id;
        let style = record.style.clone();
        let cached = self.store.replace_feature(record);
        let style_changed = self
            .own_style(&layer_id, feature_id)
            .map_or(false, |own| own != style.as_ref());
        if style_changed {
            self.apply_style(&layer_id, feature_id, style);
        }
        cached
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::watch;

    use crate::{
        gateway::scripted::{line_row, point_row, polygon_row, ScriptedGateway},
        geofile::feature::{FeatureId, LayerId},
        store::FeatureStore,
        style::{resolve, GeometryKind, PartialStyle, PolygonStyle, StyleRecord},
        sync::{
            checked::CheckedLayerSet,
            recording::{RecordingSurface, SurfaceCall},
        },
    };

    use super::{LayerEvent, LayerPhase, LayerSyncEngine};

    type TestEngine = LayerSyncEngine<ScriptedGateway, RecordingSurface>;

    fn portal() -> Arc<ScriptedGateway> {
        Arc::new(
            ScriptedGateway::new()
                .with_layer(
                    "wells",
                    GeometryKind::Point,
                    vec![
                        point_row(1, 99.0, 18.5),
                        point_row(2, 99.1, 18.6),
                        point_row(3, 99.2, 18.7),
                    ],
                )
                .with_layer(
                    "roads",
                    GeometryKind::Line,
                    vec![
                        line_row(1, &[(0.0, 0.0), (1.0, 1.0)]),
                        line_row(2, &[(1.0, 1.0), (2.0, 0.0)]),
                    ],
                )
                .with_layer(
                    "parcels",
                    GeometryKind::Polygon,
                    vec![
                        polygon_row(1, 0.0, 0.0, None),
                        polygon_row(2, 5.0, 5.0, Some(json!({ "color": "#000000" }))),
                    ],
                )
                .with_layer("empty", GeometryKind::Point, vec![]),
        )
    }

    fn engine(gateway: &Arc<ScriptedGateway>) -> TestEngine {
        LayerSyncEngine::new(
            Arc::new(FeatureStore::new(Arc::clone(gateway))),
            RecordingSurface::new(),
        )
    }

    fn ids(names: &[&str]) -> Vec<LayerId> {
        names.iter().map(|name| LayerId::from(*name)).collect()
    }

    #[tokio::test]
    async fn test_toggle_on_mounts_and_fits() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let wells = gateway.descriptor("wells");

        let report = engine.toggle(&wells);
        assert_eq!(report.started, ids(&["wells"]));
        assert!(engine.is_loading(&wells.id));

        let events = engine.settle().await;
        assert_eq!(
            events,
            vec![LayerEvent::Mounted {
                layer_id: wells.id.clone(),
                features: 3
            }]
        );
        assert_eq!(engine.phase(&wells.id), LayerPhase::Mounted);
        assert_eq!(engine.rendered_layers(), ids(&["wells"]));
        assert_eq!(engine.surface().mount_count(&wells.id), 1);
        assert_eq!(engine.surface().fit_count(), 1);
    }

    #[tokio::test]
    async fn test_toggle_sequence_converges() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        for name in ["wells", "roads", "wells", "parcels", "roads", "wells"] {
            engine.toggle(&gateway.descriptor(name));
        }
        engine.settle().await;

        let checked: Vec<LayerId> = engine.checked().ids().cloned().collect();
        assert_eq!(checked, ids(&["parcels", "wells"]));
        assert_eq!(engine.rendered_layers(), checked);
        assert_eq!(gateway.fetch_calls("wells"), 1);
        assert!(engine.settle().await.is_empty());
        assert_eq!(engine.reconcile(), Default::default());
    }

    #[tokio::test]
    async fn test_rapid_retoggle_fetches_once() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let wells = gateway.descriptor("wells");
        gateway.hold("wells");

        engine.toggle(&wells);
        tokio::task::yield_now().await;
        engine.toggle(&wells);
        let report = engine.toggle(&wells);
        assert!(report.started.is_empty());
        gateway.release("wells");
        engine.settle().await;

        assert_eq!(gateway.fetch_calls("wells"), 1);
        assert_eq!(engine.surface().mount_count(&wells.id), 1);
        assert_eq!(engine.rendered_layers(), ids(&["wells"]));
    }

    #[tokio::test]
    async fn test_unchecked_before_completion_never_mounts() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let parcels = gateway.descriptor("parcels");
        gateway.hold("parcels");

        engine.toggle(&parcels);
        tokio::task::yield_now().await;
        engine.toggle(&parcels);
        gateway.release("parcels");

        let events = engine.settle().await;
        assert_eq!(
            events,
            vec![LayerEvent::Superseded {
                layer_id: parcels.id.clone()
            }]
        );
        assert!(engine.rendered_layers().is_empty());
        assert_eq!(engine.surface().mount_count(&parcels.id), 0);
        assert!(engine.store().cached(&parcels.id).is_none());
        assert_eq!(engine.phase(&parcels.id), LayerPhase::Unmounted);
    }

    #[tokio::test]
    async fn test_failed_layer_is_isolated() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let roads = gateway.descriptor("roads");
        gateway.fail("roads", true);

        engine.toggle(&roads);
        engine.toggle(&gateway.descriptor("wells"));
        let events = engine.settle().await;
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .any(|event| matches!(event, LayerEvent::Failed { layer_id, .. } if *layer_id == roads.id)));
        assert_eq!(engine.rendered_layers(), ids(&["wells"]));
        assert!(engine.is_failed(&roads.id));
        assert_eq!(engine.notices().len(), 1);
        assert_eq!(engine.notices()[0].layer_id, roads.id);

        // Not fetched again by later passes.
        assert!(engine.reconcile().started.is_empty());
        assert_eq!(gateway.fetch_calls("roads"), 1);

        gateway.fail("roads", false);
        assert_eq!(engine.retry(&roads.id).started, ids(&["roads"]));
        engine.settle().await;
        assert_eq!(engine.rendered_layers(), ids(&["roads", "wells"]));

        let notice_id = engine.notices()[0].id;
        assert!(engine.dismiss_notice(notice_id));
        assert!(engine.notices().is_empty());
    }

    #[tokio::test]
    async fn test_failed_retry_keeps_one_notice() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let roads = gateway.descriptor("roads");
        gateway.fail("roads", true);
        engine.toggle(&roads);
        engine.settle().await;

        for _ in 0..3 {
            assert_eq!(engine.retry(&roads.id).started, ids(&["roads"]));
            engine.settle().await;
        }
        assert_eq!(gateway.fetch_calls("roads"), 4);
        assert_eq!(engine.notices().len(), 1);
        assert_eq!(engine.notices()[0].layer_id, roads.id);
    }

    #[tokio::test]
    async fn test_unchecking_failed_layer_forgets_failure() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let roads = gateway.descriptor("roads");
        gateway.fail("roads", true);
        engine.toggle(&roads);
        engine.settle().await;

        gateway.fail("roads", false);
        engine.toggle(&roads);
        assert!(!engine.is_failed(&roads.id));
        assert_eq!(engine.toggle(&roads).started, ids(&["roads"]));
        engine.settle().await;
        assert_eq!(engine.rendered_layers(), ids(&["roads"]));
    }

    #[tokio::test]
    async fn test_unstyled_polygon_gets_defaults() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let parcels = gateway.descriptor("parcels");
        engine.toggle(&parcels);
        engine.settle().await;

        let layer = engine.surface().layer(&parcels.id).unwrap();
        assert_eq!(
            layer.features[0].representation.style(),
            StyleRecord::Polygon(PolygonStyle {
                color: "#3388ff".to_string(),
                fill_color: "#3388ff".to_string(),
                weight: 2.0,
                opacity: 1.0,
                fill_opacity: 0.5,
                dash_pattern: "0".to_string(),
            })
        );
        match layer.features[1].representation.style() {
            StyleRecord::Polygon(style) => assert_eq!(style.color, "#000000"),
            other => panic!("Expected a polygon style, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_style_change_does_not_remount() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let parcels = gateway.descriptor("parcels");
        engine.toggle(&parcels);
        engine.settle().await;
        engine.surface_calls_cleared();

        let style = PartialStyle {
            fill_color: Some("#00ff00".to_string()),
            ..Default::default()
        };
        let resolved = engine
            .apply_style(&parcels.id, FeatureId(1), Some(style.clone()))
            .unwrap();
        assert_eq!(
            engine.surface().calls(),
            &[SurfaceCall::Restyle {
                layer_id: parcels.id.clone(),
                feature_id: FeatureId(1)
            }]
        );
        let drawn = &engine.surface().layer(&parcels.id).unwrap().features[0];
        assert_eq!(drawn.representation.style(), resolved);

        let cached = engine.store().cached(&parcels.id).unwrap();
        assert_eq!(cached[0].style, Some(style));
        assert!(engine
            .apply_style(&parcels.id, FeatureId(42), None)
            .is_none());
    }

    #[tokio::test]
    async fn test_empty_layer_mounts_without_fit() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        engine.toggle(&gateway.descriptor("empty"));
        let events = engine.settle().await;
        assert_eq!(
            events,
            vec![LayerEvent::Mounted {
                layer_id: LayerId::from("empty"),
                features: 0
            }]
        );
        assert_eq!(engine.rendered_layers(), ids(&["empty"]));
        assert_eq!(engine.surface().fit_count(), 0);
    }

    #[tokio::test]
    async fn test_removals_before_additions() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        engine.toggle(&gateway.descriptor("wells"));
        engine.settle().await;
        engine.surface_calls_cleared();

        let report = engine.set_checked([&gateway.descriptor("roads")].into_iter().collect());
        assert_eq!(report.unmounted, ids(&["wells"]));
        assert_eq!(report.started, ids(&["roads"]));
        assert_eq!(
            engine.surface().calls(),
            &[SurfaceCall::Unmount {
                layer_id: LayerId::from("wells")
            }]
        );
        assert!(engine.store().cached(&LayerId::from("wells")).is_none());

        engine.settle().await;
        assert!(matches!(
            engine.surface().calls(),
            [
                SurfaceCall::Unmount { .. },
                SurfaceCall::Mount { features: 2, .. },
                SurfaceCall::FitBounds(_)
            ]
        ));
    }

    #[tokio::test]
    async fn test_refit_only_on_first_mount() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let wells = gateway.descriptor("wells");
        engine.toggle(&wells);
        engine.settle().await;
        engine.toggle(&wells);
        engine.toggle(&wells);
        engine.settle().await;
        assert_eq!(engine.surface().mount_count(&wells.id), 2);
        assert_eq!(engine.surface().unmount_count(&wells.id), 1);
        assert_eq!(engine.surface().fit_count(), 1);
        assert_eq!(gateway.fetch_calls("wells"), 2);
    }

    #[tokio::test]
    async fn test_features_of_another_class_are_skipped() {
        let gateway = Arc::new(ScriptedGateway::new().with_layer(
            "mixed",
            GeometryKind::Point,
            vec![point_row(1, 1.0, 1.0), polygon_row(2, 0.0, 0.0, None)],
        ));
        let mut engine = engine(&gateway);
        engine.toggle(&gateway.descriptor("mixed"));
        assert_eq!(
            engine.settle().await,
            vec![LayerEvent::Mounted {
                layer_id: LayerId::from("mixed"),
                features: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_follow_converges_to_last_intent() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let wells = gateway.descriptor("wells");
        let roads = gateway.descriptor("roads");
        let (sender, receiver) = watch::channel(CheckedLayerSet::new());

        let publish = async move {
            sender.send_replace([&wells].into_iter().collect());
            tokio::task::yield_now().await;
            sender.send_replace([&wells, &roads].into_iter().collect());
            tokio::task::yield_now().await;
            sender.send_replace([&roads].into_iter().collect());
        };
        let (events, _) = tokio::join!(engine.follow(receiver), publish);

        assert!(!events.is_empty());
        assert_eq!(engine.rendered_layers(), ids(&["roads"]));
        assert!(!engine.has_pending_loads());
    }

    #[tokio::test]
    async fn test_resolve_click() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let wells = gateway.descriptor("wells");
        engine.toggle(&wells);
        engine.settle().await;

        let target = engine.surface().layer(&wells.id).unwrap().features[0]
            .click
            .clone();
        let record = engine.resolve_click(&target).await.unwrap();
        assert_eq!(record.feature_id, FeatureId(1));
        assert_eq!(record.attributes["name"], json!("point 1"));
        assert_eq!(gateway.feature_calls(), 1);
    }

    #[tokio::test]
    async fn test_layer_default_restyles_unstyled_features() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let parcels = gateway.descriptor("parcels");
        engine.toggle(&parcels);
        engine.settle().await;
        engine.surface_calls_cleared();

        let default = PartialStyle {
            fill_color: Some("#ff0000".to_string()),
            ..Default::default()
        };
        assert_eq!(engine.set_layer_default(&parcels.id, Some(default.clone())), 1);
        assert_eq!(engine.surface().calls().len(), 1);
        assert_eq!(
            engine.feature_style(&parcels.id, FeatureId(1)),
            Some(resolve(GeometryKind::Polygon, Some(&default)))
        );
        match engine.feature_style(&parcels.id, FeatureId(2)) {
            Some(StyleRecord::Polygon(style)) => assert_eq!(style.fill_color, "#3388ff"),
            other => panic!("Expected a polygon style, got {:?}", other),
        }

        // Still applies after a remount.
        engine.toggle(&parcels);
        engine.toggle(&parcels);
        engine.settle().await;
        let layer = engine.surface().layer(&parcels.id).unwrap();
        assert_eq!(
            layer.features[0].representation.style(),
            resolve(GeometryKind::Polygon, Some(&default))
        );
    }

    #[tokio::test]
    async fn test_refresh_layer_reloads_features() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let wells = gateway.descriptor("wells");
        engine.toggle(&wells);
        engine.settle().await;

        gateway.push_row("wells", point_row(4, 99.3, 18.8));
        let report = engine.refresh_layer(&wells.id);
        assert_eq!(report.unmounted, ids(&["wells"]));
        assert_eq!(report.started, ids(&["wells"]));
        assert_eq!(
            engine.settle().await,
            vec![LayerEvent::Mounted {
                layer_id: wells.id.clone(),
                features: 4
            }]
        );
        assert_eq!(gateway.fetch_calls("wells"), 2);
        assert_eq!(engine.surface().fit_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_while_loading_reloads_after_completion() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let wells = gateway.descriptor("wells");
        gateway.hold("wells");
        engine.toggle(&wells);
        tokio::task::yield_now().await;

        gateway.push_row("wells", point_row(4, 99.3, 18.8));
        assert_eq!(engine.refresh_layer(&wells.id), Default::default());
        gateway.release("wells");

        assert_eq!(
            engine.settle().await,
            vec![
                LayerEvent::Reloading {
                    layer_id: wells.id.clone()
                },
                LayerEvent::Mounted {
                    layer_id: wells.id.clone(),
                    features: 4
                }
            ]
        );
        assert_eq!(gateway.fetch_calls("wells"), 2);
        assert_eq!(engine.surface().mount_count(&wells.id), 1);
        assert_eq!(engine.store().cached(&wells.id).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_refresh_of_superseded_load_is_dropped() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let wells = gateway.descriptor("wells");
        gateway.hold("wells");
        engine.toggle(&wells);
        tokio::task::yield_now().await;

        engine.refresh_layer(&wells.id);
        engine.toggle(&wells);
        gateway.release("wells");

        assert_eq!(
            engine.settle().await,
            vec![LayerEvent::Superseded {
                layer_id: wells.id.clone()
            }]
        );
        assert_eq!(gateway.fetch_calls("wells"), 1);

        engine.toggle(&wells);
        assert_eq!(
            engine.settle().await,
            vec![LayerEvent::Mounted {
                layer_id: wells.id.clone(),
                features: 3
            }]
        );
    }

    #[tokio::test]
    async fn test_cleared_loads_are_stale() {
        let gateway = portal();
        let mut engine = engine(&gateway);
        let wells = gateway.descriptor("wells");
        gateway.hold("wells");
        engine.toggle(&wells);
        tokio::task::yield_now().await;

        engine.clear();
        assert!(engine.checked().is_empty());
        gateway.release("wells");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!engine.store().is_loading(&wells.id));
        assert!(engine.next_event().await.is_none());

        engine.toggle(&wells);
        let events = engine.settle().await;
        assert_eq!(
            events,
            vec![
                LayerEvent::Stale {
                    layer_id: wells.id.clone()
                },
                LayerEvent::Mounted {
                    layer_id: wells.id.clone(),
                    features: 3
                }
            ]
        );
        assert_eq!(gateway.fetch_calls("wells"), 2);
    }

    impl TestEngine {
        fn surface_calls_cleared(&mut self) {
            self.surface.clear_calls();
        }
    }
}
