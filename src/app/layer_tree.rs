//! Arena-Baum aller Layer mit dem asynchronen Load/Draw/Save-Lebenszyklus.
//!
//! Layer werden über stabile IDs adressiert; jeder Knoten kennt seinen Eltern-Layer
//! (ohne Besitz) und besitzt die Liste seiner Kinder. Der Baum lebt ausschließlich
//! auf der Authority und veröffentlicht jede Zustandsänderung als
//! [`ReplicationEvent`] auf einem Broadcast-Kanal.
//!
//! Loader-Aufrufe laufen als tokio-Tasks. Jeder Task steckt in einem
//! [`LoaderTask`], der beim Drop abbricht; offene Loads liegen in `pending_loads`
//! und werden beim Zerstören eines Layers abgebrochen und abgewartet.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::{self, join_all, BoxFuture};
use glam::Vec3;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};

use super::history::Snapshot;
use super::layer::{CheckoutState, FeatureMap, LayerNode};
use super::loader::LayerLoader;
use super::replication::{LayerStateSnapshot, ReplicationEvent};
use crate::core::{
    EditError, EditResult, FeatureId, FeatureNode, FeatureRecord, IdAllocator, LayerId,
    LayerMetadata, SpatialMatch,
};
use crate::shared::EditorOptions;

type LoadResult = anyhow::Result<Vec<FeatureRecord>>;

/// Abbrechbarer Handle auf einen Loader-Task; bricht beim Drop ab.
struct LoaderTask<T> {
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> LoaderTask<T> {
    fn spawn(work: BoxFuture<'static, T>) -> Self {
        Self {
            handle: tokio::spawn(work),
        }
    }

    async fn join(&mut self) -> Result<T, JoinError> {
        (&mut self.handle).await
    }

    /// Bricht ab und wartet, bis der Task wirklich beendet ist.
    async fn cancel(mut self) -> Result<T, JoinError> {
        self.handle.abort();
        (&mut self.handle).await
    }
}

impl<T> Drop for LoaderTask<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Beschreibung eines neuen Layers.
#[derive(Clone)]
pub struct LayerSpec {
    /// Vorgegebene ID (z.B. aus einer Projektbeschreibung)
    pub id: Option<LayerId>,
    pub metadata: LayerMetadata,
    pub container: bool,
    pub writeable: bool,
    pub loader: Option<Arc<dyn LayerLoader>>,
}

impl LayerSpec {
    /// Container-Layer ohne Loader.
    pub fn container(metadata: LayerMetadata) -> Self {
        Self {
            id: None,
            metadata,
            container: true,
            writeable: true,
            loader: None,
        }
    }

    /// Feature-Layer mit Loader.
    pub fn leaf(metadata: LayerMetadata, loader: Arc<dyn LayerLoader>) -> Self {
        Self {
            id: None,
            metadata,
            container: false,
            writeable: true,
            loader: Some(loader),
        }
    }

    pub fn with_id(mut self, id: LayerId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_writeable(mut self, writeable: bool) -> Self {
        self.writeable = writeable;
        self
    }
}

/// Der autoritative Layer-Baum.
pub struct LayerTree {
    nodes: HashMap<LayerId, LayerNode>,
    roots: Vec<LayerId>,
    layer_ids: IdAllocator,
    feature_ids: IdAllocator,
    pending_loads: HashMap<LayerId, LoaderTask<LoadResult>>,
    events: broadcast::Sender<ReplicationEvent>,
    epsilon: f32,
    undo_depth: usize,
}

impl LayerTree {
    /// Leerer Baum mit den Geometrie- und Replikationsoptionen aus `options`.
    pub fn new(options: &EditorOptions) -> Self {
        let (events, _) = broadcast::channel(options.replication_capacity.max(1));
        Self {
            nodes: HashMap::new(),
            roots: Vec::new(),
            layer_ids: IdAllocator::starting_at(1),
            feature_ids: IdAllocator::starting_at(1),
            pending_loads: HashMap::new(),
            events,
            epsilon: options.ring_close_epsilon,
            undo_depth: options.undo_depth,
        }
    }

    // ── Replikation ─────────────────────────────────────────────────

    /// Neuer Empfänger für alle künftigen Events.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: ReplicationEvent) {
        // Ohne Empfänger ist send() ein Fehler; das ist kein Problem
        let _ = self.events.send(event);
    }

    /// Events, die eine frische Replika auf den aktuellen Stand bringen.
    pub fn snapshot_events(&self) -> Vec<ReplicationEvent> {
        let mut out = Vec::new();
        for root in &self.roots {
            for id in self.pre_order(*root).unwrap_or_default() {
                let Some(node) = self.nodes.get(&id) else {
                    continue;
                };
                out.push(ReplicationEvent::LayerSpawned {
                    layer: id,
                    state: state_of(node),
                });
                if !node.container {
                    out.push(ReplicationEvent::FeaturesReplaced {
                        layer: id,
                        features: node.feature_records(),
                    });
                }
            }
        }
        out
    }

    // ── Struktur ────────────────────────────────────────────────────

    /// Hält `id` für einen später eingehängten Layer frei.
    ///
    /// Automatisch vergebene IDs liegen danach immer oberhalb von `id`.
    pub fn reserve_layer_id(&mut self, id: LayerId) {
        self.layer_ids.reserve(id.get());
    }

    /// Hängt einen neuen Layer unter `parent` (oder als Wurzel) ein.
    pub fn add_layer(&mut self, parent: Option<LayerId>, spec: LayerSpec) -> EditResult<LayerId> {
        if let Some(p) = parent {
            if !self.layer(p)?.container {
                return Err(EditError::topology(format!("Layer {p} ist kein Container")));
            }
        }
        let id = match spec.id {
            Some(id) if self.nodes.contains_key(&id) => {
                return Err(EditError::topology(format!("Layer-ID {id} ist bereits vergeben")));
            }
            Some(id) => {
                self.layer_ids.reserve(id.get());
                id
            }
            None => LayerId(self.layer_ids.allocate()),
        };

        let node = LayerNode::new(
            id,
            parent,
            spec.metadata,
            spec.container,
            spec.writeable,
            spec.loader,
            self.undo_depth,
        );
        let state = state_of(&node);
        self.nodes.insert(id, node);
        match parent.and_then(|p| self.nodes.get_mut(&p)) {
            Some(p) => p.children.push(id),
            None => self.roots.push(id),
        }

        log::debug!("Layer {} angelegt (Eltern: {:?})", id, parent);
        self.publish(ReplicationEvent::LayerSpawned { layer: id, state });
        Ok(id)
    }

    pub fn get(&self, id: LayerId) -> Option<&LayerNode> {
        self.nodes.get(&id)
    }

    /// Wie [`get`](Self::get), aber mit `UnknownLayer`-Fehler.
    pub fn layer(&self, id: LayerId) -> EditResult<&LayerNode> {
        self.nodes.get(&id).ok_or(EditError::UnknownLayer(id))
    }

    pub(crate) fn layer_mut(&mut self, id: LayerId) -> EditResult<&mut LayerNode> {
        self.nodes.get_mut(&id).ok_or(EditError::UnknownLayer(id))
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn roots(&self) -> &[LayerId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Alle Vorfahren, vom Eltern-Layer bis zur Wurzel.
    pub fn ancestors(&self, id: LayerId) -> EditResult<Vec<LayerId>> {
        let mut out = Vec::new();
        let mut current = self.layer(id)?.parent;
        while let Some(p) = current {
            out.push(p);
            current = self.nodes.get(&p).and_then(|n| n.parent);
        }
        Ok(out)
    }

    /// Teilbaum in Pre-Order (Eltern vor Kindern).
    pub fn pre_order(&self, id: LayerId) -> EditResult<Vec<LayerId>> {
        self.layer(id)?;
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(l) = stack.pop() {
            out.push(l);
            if let Some(node) = self.nodes.get(&l) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        Ok(out)
    }

    /// Teilbaum in Post-Order (Kinder vor Eltern).
    pub fn post_order(&self, id: LayerId) -> EditResult<Vec<LayerId>> {
        self.layer(id)?;
        let mut out = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((l, expanded)) = stack.pop() {
            if expanded {
                out.push(l);
                continue;
            }
            stack.push((l, true));
            if let Some(node) = self.nodes.get(&l) {
                stack.extend(node.children.iter().rev().map(|c| (*c, false)));
            }
        }
        Ok(out)
    }

    /// Alle Layer aller Wurzeln in Pre-Order.
    pub fn all_layers(&self) -> Vec<LayerId> {
        self.roots
            .iter()
            .flat_map(|r| self.pre_order(*r).unwrap_or_default())
            .collect()
    }

    // ── Replizierte Zellen ──────────────────────────────────────────

    /// Setzt `changed` auf dem Layer und mit demselben Wert auf jedem Vorfahren.
    pub fn set_changed(&mut self, id: LayerId, value: bool) -> EditResult<()> {
        self.layer(id)?;
        let mut current = Some(id);
        while let Some(l) = current {
            let Some(node) = self.nodes.get_mut(&l) else {
                break;
            };
            let change = node.changed.set(value);
            current = node.parent;
            if let Some(change) = change {
                self.publish(ReplicationEvent::Changed { layer: l, change });
            }
        }
        Ok(())
    }

    pub fn set_metadata(&mut self, id: LayerId, metadata: LayerMetadata) -> EditResult<()> {
        let node = self.layer_mut(id)?;
        if let Some(change) = node.metadata.set(metadata) {
            self.publish(ReplicationEvent::Metadata { layer: id, change });
        }
        Ok(())
    }

    pub fn set_writeable(&mut self, id: LayerId, writeable: bool) -> EditResult<()> {
        let node = self.layer_mut(id)?;
        if let Some(change) = node.writeable.set(writeable) {
            self.publish(ReplicationEvent::Writeable { layer: id, change });
        }
        Ok(())
    }

    /// Setzt die Checkout-Zustandsmaschine und die replizierte `checked_out`-Zelle.
    pub(crate) fn set_checkout(&mut self, id: LayerId, state: CheckoutState) -> EditResult<()> {
        let node = self.layer_mut(id)?;
        node.checkout = state;
        if let Some(change) = node.checked_out.set(state.is_held()) {
            self.publish(ReplicationEvent::CheckedOut { layer: id, change });
        }
        Ok(())
    }

    // ── Features ────────────────────────────────────────────────────

    fn leaf_mut(&mut self, id: LayerId) -> EditResult<&mut LayerNode> {
        let node = self.layer_mut(id)?;
        if node.container {
            return Err(EditError::topology(format!(
                "Container-Layer {id} besitzt keine Features"
            )));
        }
        Ok(node)
    }

    /// Wendet `edit` atomar auf eine Kopie des Features an.
    ///
    /// Nur bei Erfolg wird der Undo-Snapshot aufgenommen, die Kopie übernommen,
    /// das Update veröffentlicht und der Layer als geändert markiert.
    pub(crate) fn mutate_feature<R>(
        &mut self,
        layer: LayerId,
        feature: FeatureId,
        edit: impl FnOnce(&mut FeatureNode) -> EditResult<R>,
    ) -> EditResult<R> {
        let node = self.leaf_mut(layer)?;
        let mut working = node
            .features
            .get(&feature)
            .cloned()
            .ok_or(EditError::UnknownFeature(feature))?;
        let result = edit(&mut working)?;

        let snap = node.snapshot();
        node.history.record_snapshot(snap);
        let record = working.to_record();
        node.features_mut().insert(feature, working);

        self.publish(ReplicationEvent::FeatureUpdated {
            layer,
            feature: record,
        });
        self.set_changed(layer, true)?;
        Ok(result)
    }

    /// Wendet `edit` auf mehrere Features an; ein Undo-Schritt für alle.
    pub(crate) fn mutate_features(
        &mut self,
        layer: LayerId,
        ids: &[FeatureId],
        edit: impl Fn(&mut FeatureNode),
    ) -> EditResult<usize> {
        let node = self.leaf_mut(layer)?;
        let targets: Vec<FeatureId> = ids
            .iter()
            .copied()
            .filter(|id| node.features.contains_key(id))
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let snap = node.snapshot();
        node.history.record_snapshot(snap);
        let features = node.features_mut();
        let mut records = Vec::with_capacity(targets.len());
        for id in &targets {
            if let Some(feature) = features.get_mut(id) {
                edit(feature);
                records.push(feature.to_record());
            }
        }

        for record in records {
            self.publish(ReplicationEvent::FeatureUpdated {
                layer,
                feature: record,
            });
        }
        self.set_changed(layer, true)?;
        Ok(targets.len())
    }

    /// Fügt ein Feature aus einem Record ein und vergibt eine neue Feature-ID.
    pub(crate) fn insert_feature(
        &mut self,
        layer: LayerId,
        record: &FeatureRecord,
    ) -> EditResult<FeatureId> {
        let epsilon = self.epsilon;
        let id = FeatureId(self.feature_ids.peek());
        let feature = FeatureNode::from_record(id, record, epsilon)?;
        self.feature_ids.allocate();

        let node = self.leaf_mut(layer)?;
        let snap = node.snapshot();
        node.history.record_snapshot(snap);
        let published = feature.to_record();
        node.features_mut().insert(id, feature);

        self.publish(ReplicationEvent::FeatureUpdated {
            layer,
            feature: published,
        });
        self.set_changed(layer, true)?;
        Ok(id)
    }

    /// Entfernt ein Feature samt Selektion.
    pub(crate) fn remove_feature(
        &mut self,
        layer: LayerId,
        feature: FeatureId,
    ) -> EditResult<FeatureNode> {
        let node = self.leaf_mut(layer)?;
        if !node.features.contains_key(&feature) {
            return Err(EditError::UnknownFeature(feature));
        }
        let snap = node.snapshot();
        node.history.record_snapshot(snap);
        let removed = node
            .features_mut()
            .shift_remove(&feature)
            .ok_or(EditError::UnknownFeature(feature))?;
        node.selection.shift_remove(&feature);

        self.publish(ReplicationEvent::FeatureRemoved { layer, feature });
        self.set_changed(layer, true)?;
        Ok(removed)
    }

    /// Ersetzt die Selektion; unbekannte IDs werden ignoriert.
    pub(crate) fn select(&mut self, layer: LayerId, ids: &[FeatureId]) -> EditResult<usize> {
        let node = self.leaf_mut(layer)?;
        node.selection = ids
            .iter()
            .copied()
            .filter(|id| node.features.contains_key(id))
            .collect();
        Ok(node.selection.len())
    }

    pub(crate) fn set_block_move(
        &mut self,
        layer: LayerId,
        feature: FeatureId,
        block_move: bool,
    ) -> EditResult<()> {
        let node = self.leaf_mut(layer)?;
        if !node.features.contains_key(&feature) {
            return Err(EditError::UnknownFeature(feature));
        }
        if let Some(f) = node.features_mut().get_mut(&feature) {
            f.set_block_move(block_move);
        }
        Ok(())
    }

    /// Nächstes Feature im Teilbaum von `id`, ohne die IDs in `exclude`.
    pub fn get_closest(
        &mut self,
        id: LayerId,
        point: Vec3,
        exclude: &HashSet<FeatureId>,
    ) -> EditResult<Option<(LayerId, SpatialMatch)>> {
        let mut best: Option<(LayerId, SpatialMatch)> = None;
        for l in self.pre_order(id)? {
            let Some(node) = self.nodes.get_mut(&l) else {
                continue;
            };
            let Some(hit) = node.closest(point, exclude) else {
                continue;
            };
            let closer = match &best {
                Some((_, current)) => hit.distance < current.distance,
                None => true,
            };
            if closer {
                best = Some((l, hit));
            }
        }
        Ok(best)
    }

    // ── Historie ────────────────────────────────────────────────────

    /// Setzt den Checkpoint aller Feature-Layer im Teilbaum auf den aktuellen Stand.
    pub fn checkpoint(&mut self, id: LayerId) -> EditResult<()> {
        for l in self.pre_order(id)? {
            if let Some(node) = self.nodes.get_mut(&l) {
                node.take_checkpoint();
            }
        }
        Ok(())
    }

    /// Setzt den Layer auf seinen Checkpoint zurück.
    ///
    /// Liefert `true`, wenn sich dabei etwas geändert hat; der Layer muss dann neu gezeichnet werden.
    pub fn restore_checkpoint(&mut self, id: LayerId) -> EditResult<bool> {
        let node = self.layer_mut(id)?;
        node.history.clear_edits();
        let Some(snap) = node.history.checkpoint().cloned() else {
            return Ok(false);
        };
        if snap.shares_features(&node.features) {
            return Ok(false);
        }
        node.apply_snapshot(snap);
        let features = node.feature_records();
        self.publish(ReplicationEvent::FeaturesReplaced {
            layer: id,
            features,
        });
        self.set_changed(id, true)?;
        Ok(true)
    }

    /// Verwirft Undo/Redo des Layers (Checkpoint bleibt).
    pub(crate) fn clear_history(&mut self, id: LayerId) -> EditResult<()> {
        self.layer_mut(id)?.history.clear_edits();
        Ok(())
    }

    /// Macht den letzten Edit rückgängig; `false`, wenn nichts rückgängig zu machen ist.
    pub(crate) fn undo(&mut self, id: LayerId) -> EditResult<bool> {
        let node = self.leaf_mut(id)?;
        let current = node.snapshot();
        let Some(prev) = node.history.pop_undo_with_current(current) else {
            return Ok(false);
        };
        self.apply_history_snapshot(id, prev)?;
        Ok(true)
    }

    pub(crate) fn redo(&mut self, id: LayerId) -> EditResult<bool> {
        let node = self.leaf_mut(id)?;
        let current = node.snapshot();
        let Some(next) = node.history.pop_redo_with_current(current) else {
            return Ok(false);
        };
        self.apply_history_snapshot(id, next)?;
        Ok(true)
    }

    fn apply_history_snapshot(&mut self, id: LayerId, snap: Snapshot) -> EditResult<()> {
        let node = self.layer_mut(id)?;
        node.apply_snapshot(snap);
        let features = node.feature_records();
        self.publish(ReplicationEvent::FeaturesReplaced {
            layer: id,
            features,
        });
        self.set_changed(id, true)
    }

    // ── Laden ───────────────────────────────────────────────────────

    /// Startet `init` des Loaders als Hintergrund-Task; ein laufender Load wird ersetzt.
    pub fn begin_load(&mut self, id: LayerId) -> EditResult<()> {
        let node = self.layer(id)?;
        let Some(loader) = node.loader.clone() else {
            return Ok(());
        };
        if node.container {
            return Ok(());
        }
        let source = node.source();
        let task = LoaderTask::spawn(loader.init(source));
        if self.pending_loads.insert(id, task).is_some() {
            log::debug!("Laufender Load von Layer {} ersetzt", id);
        }
        Ok(())
    }

    /// `true`, solange ein Load des Layers aussteht.
    pub fn is_loading(&self, id: LayerId) -> bool {
        self.pending_loads.contains_key(&id)
    }

    /// Wartet einen ausstehenden Load ab und übernimmt dessen Ergebnis.
    pub async fn complete_pending(&mut self, id: LayerId) {
        let Some(mut task) = self.pending_loads.remove(&id) else {
            return;
        };
        let result = task.join().await;
        self.finish_load(id, result);
    }

    /// Schließt alle ausstehenden Loads im Teilbaum ab (SubInit vor Draw).
    pub async fn settle(&mut self, id: LayerId) -> EditResult<()> {
        for l in self.pre_order(id)? {
            self.complete_pending(l).await;
        }
        Ok(())
    }

    /// Lädt den ganzen Teilbaum; Geschwister laden nebenläufig.
    pub async fn load(&mut self, id: LayerId) -> EditResult<()> {
        let layers = self.pre_order(id)?;
        for l in &layers {
            self.begin_load(*l)?;
        }
        for l in layers {
            self.complete_pending(l).await;
        }
        Ok(())
    }

    /// Feature-IDs sind baumweit eindeutig; der Layer `own` selbst zählt nicht.
    fn feature_in_other_layer(&self, own: LayerId, feature: FeatureId) -> bool {
        self.nodes
            .iter()
            .any(|(l, node)| *l != own && node.features.contains_key(&feature))
    }

    fn finish_load(&mut self, id: LayerId, result: Result<LoadResult, JoinError>) {
        let records = match result {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                let failure = EditError::LoadFailure {
                    layer: id,
                    reason: format!("{e:#}"),
                };
                log::warn!("{}; Layer bleibt leer", failure);
                Vec::new()
            }
            Err(e) if e.is_cancelled() => {
                log::debug!("Load von Layer {} abgebrochen", id);
                return;
            }
            Err(e) => {
                log::warn!("Load-Task von Layer {} abgestürzt: {}; Layer bleibt leer", id, e);
                Vec::new()
            }
        };

        let epsilon = self.epsilon;
        let mut features = FeatureMap::new();
        for record in &records {
            let feature_id = match record.id {
                Some(fid)
                    if !features.contains_key(&fid) && !self.feature_in_other_layer(id, fid) =>
                {
                    self.feature_ids.reserve(fid.get());
                    fid
                }
                _ => FeatureId(self.feature_ids.allocate()),
            };
            match FeatureNode::from_record(feature_id, record, epsilon) {
                Ok(feature) => {
                    features.insert(feature_id, feature);
                }
                Err(e) => log::warn!(
                    "Feature {} in Layer {} übersprungen: {}",
                    feature_id,
                    id,
                    e
                ),
            }
        }

        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        node.features = Arc::new(features);
        node.selection.clear();
        node.spatial = None;
        node.history.clear_edits();
        node.take_checkpoint();
        let count = node.features.len();
        let published = node.feature_records();

        log::info!("Layer {} geladen: {} Features", id, count);
        self.publish(ReplicationEvent::FeaturesReplaced {
            layer: id,
            features: published,
        });
        // Frisch geladene Features müssen materialisiert werden
        let _ = self.set_changed(id, true);
    }

    // ── Zeichnen ────────────────────────────────────────────────────

    /// Zeichnet alle geänderten Layer des Teilbaums neu.
    ///
    /// Feature-Layer zeichnen nebenläufig; ein Container zeichnet erst, wenn alle
    /// Kinder fertig sind. Nicht geänderte Layer werden übersprungen.
    pub async fn draw(&mut self, id: LayerId) -> EditResult<()> {
        self.settle(id).await?;
        let order = self.post_order(id)?;
        let (containers, leaves): (Vec<LayerId>, Vec<LayerId>) = order
            .into_iter()
            .filter(|l| self.nodes.get(l).is_some_and(LayerNode::is_changed))
            .partition(|l| self.nodes.get(l).is_some_and(LayerNode::is_container));

        if containers.is_empty() && leaves.is_empty() {
            log::debug!("Draw von Layer {}: nichts geändert", id);
            return Ok(());
        }

        let mut tasks: Vec<(LayerId, LoaderTask<anyhow::Result<()>>)> = Vec::new();
        for l in leaves {
            if let Some(task) = self.spawn_draw(l) {
                tasks.push((l, task));
            }
        }
        // Barriere: alle Kinder fertig, bevor ein Container zeichnet
        let results = join_all(
            tasks
                .iter_mut()
                .map(|(l, task)| async move { (*l, task.join().await) }),
        )
        .await;
        drop(tasks);
        for (l, result) in results {
            self.finish_draw(l, result);
        }

        for c in containers {
            if let Some(mut task) = self.spawn_draw(c) {
                let result = task.join().await;
                self.finish_draw(c, result);
            }
        }
        Ok(())
    }

    fn spawn_draw(&mut self, id: LayerId) -> Option<LoaderTask<anyhow::Result<()>>> {
        let node = self.nodes.get_mut(&id)?;
        node.materialized.clear();
        let work: BoxFuture<'static, anyhow::Result<()>> = match &node.loader {
            Some(loader) => loader.draw(node.source(), node.feature_records()),
            None => Box::pin(future::ready(Ok(()))),
        };
        Some(LoaderTask::spawn(work))
    }

    fn finish_draw(&mut self, id: LayerId, result: Result<anyhow::Result<()>, JoinError>) {
        match result {
            Ok(Ok(())) => {
                let Some(node) = self.nodes.get_mut(&id) else {
                    return;
                };
                node.materialized = node.features.keys().copied().collect();
                node.draw_generation += 1;
                let _ = self.set_changed(id, false);
            }
            Ok(Err(e)) => log::warn!("Draw von Layer {} fehlgeschlagen: {:#}", id, e),
            Err(e) if e.is_cancelled() => log::debug!("Draw von Layer {} abgebrochen", id),
            Err(e) => log::warn!("Draw-Task von Layer {} abgestürzt: {}", id, e),
        }
    }

    // ── Speichern ───────────────────────────────────────────────────

    /// Persistiert alle geänderten Feature-Layer des Teilbaums.
    ///
    /// Fehler werden nie verschluckt: der erste `SaveFailure` geht an den Aufrufer,
    /// der betroffene Layer bleibt `changed` und merkt sich den Fehler.
    pub async fn save(&mut self, id: LayerId) -> EditResult<()> {
        self.settle(id).await?;
        let order = self.post_order(id)?;
        let (containers, leaves): (Vec<LayerId>, Vec<LayerId>) = order
            .into_iter()
            .filter(|l| self.nodes.get(l).is_some_and(LayerNode::is_changed))
            .partition(|l| self.nodes.get(l).is_some_and(LayerNode::is_container));

        let mut tasks: Vec<(LayerId, LoaderTask<anyhow::Result<()>>)> = Vec::new();
        for l in leaves {
            if let Some(task) = self.spawn_save(l) {
                tasks.push((l, task));
            }
        }
        let results = join_all(
            tasks
                .iter_mut()
                .map(|(l, task)| async move { (*l, task.join().await) }),
        )
        .await;
        drop(tasks);

        let mut first_error = None;
        for (l, result) in results {
            if let Err(e) = self.finish_save(l, result) {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        for c in containers {
            self.set_changed(c, false)?;
        }
        Ok(())
    }

    fn spawn_save(&self, id: LayerId) -> Option<LoaderTask<anyhow::Result<()>>> {
        let node = self.nodes.get(&id)?;
        let work: BoxFuture<'static, anyhow::Result<()>> = match &node.loader {
            Some(loader) => loader.save(node.source(), node.feature_records()),
            None => Box::pin(future::ready(Ok(()))),
        };
        Some(LoaderTask::spawn(work))
    }

    fn finish_save(
        &mut self,
        id: LayerId,
        result: Result<anyhow::Result<()>, JoinError>,
    ) -> EditResult<()> {
        let outcome = match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(e) => Err(e.to_string()),
        };
        let node = self.layer_mut(id)?;
        match outcome {
            Ok(()) => {
                node.last_save_error = None;
                node.take_checkpoint();
                log::info!("Layer {} gespeichert", id);
                self.set_changed(id, false)
            }
            Err(reason) => {
                node.last_save_error = Some(reason.clone());
                let failure = EditError::SaveFailure { layer: id, reason };
                log::error!("{}", failure);
                Err(failure)
            }
        }
    }

    // ── Abbau ───────────────────────────────────────────────────────

    /// Zerstört den Teilbaum von `id`, Blätter zuerst.
    ///
    /// Ausstehende Loads werden abgebrochen und abgewartet, bevor der Knoten
    /// freigegeben wird. Abbrüche sind normaler Abbau und werden nur auf
    /// Debug-Level geloggt.
    pub async fn destroy(&mut self, id: LayerId) -> EditResult<()> {
        let order = self.post_order(id)?;
        let parent = self.layer(id)?.parent;
        match parent.and_then(|p| self.nodes.get_mut(&p)) {
            Some(parent) => parent.children.retain(|c| *c != id),
            None => self.roots.retain(|r| *r != id),
        }

        for l in order {
            if let Some(task) = self.pending_loads.remove(&l) {
                match task.cancel().await {
                    Err(e) if e.is_cancelled() => {
                        log::debug!("Ausstehender Load von Layer {} beim Abbau abgebrochen", l)
                    }
                    Err(e) => log::warn!("Load-Task von Layer {} abgestürzt: {}", l, e),
                    Ok(_) => log::debug!("Load von Layer {} war beim Abbau bereits fertig", l),
                }
            }
            self.nodes.remove(&l);
            self.publish(ReplicationEvent::LayerDespawned { layer: l });
        }
        log::debug!("Layer {} mit Teilbaum zerstört", id);
        Ok(())
    }

    /// Zerstört alle Wurzeln.
    pub async fn destroy_all(&mut self) {
        let roots = self.roots.clone();
        for root in roots {
            let _ = self.destroy(root).await;
        }
    }
}

fn state_of(node: &LayerNode) -> LayerStateSnapshot {
    LayerStateSnapshot {
        parent: node.parent,
        container: node.container,
        metadata: node.metadata().clone(),
        checked_out: node.is_checked_out(),
        writeable: node.is_writeable(),
        changed: node.is_changed(),
        shape: node.feature_shape(),
    }
}

#[cfg(test)]
mod tests;
