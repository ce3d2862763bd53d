//! Zustand eines einzelnen Layers im Arena-Baum.
//!
//! `LayerNode` hält die replizierten Zellen (Metadaten, Checkout, Beschreibbarkeit,
//! `changed`), die Checkout-Zustandsmaschine und die Features. Schreibzugriffe
//! laufen ausschließlich über den `LayerTree`, der jede Zelländerung
//! als Replikations-Event veröffentlicht.

use std::collections::HashSet;
use std::sync::Arc;

use glam::Vec3;
use indexmap::{IndexMap, IndexSet};

use super::history::{LayerHistory, Snapshot};
use super::loader::{LayerLoader, LayerSource};
use crate::core::{
    FeatureId, FeatureNode, FeatureRecord, FeatureShape, LayerId, LayerMetadata, ReplicaId,
    SpatialIndex, SpatialMatch, ValueCell,
};

/// Geordnete Feature-Map eines Layers.
pub type FeatureMap = IndexMap<FeatureId, FeatureNode>;

/// Checkout-Zustandsmaschine eines Layers.
///
/// `Available → CheckedOut → Committing → Available`; ein fehlgeschlagener
/// Commit fällt auf `CheckedOut` zurück.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckoutState {
    #[default]
    Available,
    CheckedOut {
        holder: ReplicaId,
    },
    Committing {
        holder: ReplicaId,
    },
}

impl CheckoutState {
    /// Aktueller Halter, falls ausgecheckt.
    pub fn holder(&self) -> Option<ReplicaId> {
        match *self {
            Self::Available => None,
            Self::CheckedOut { holder } | Self::Committing { holder } => Some(holder),
        }
    }

    /// `true`, solange irgendein Halter existiert.
    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }
}

/// Ein Layer: Container für Sub-Layer oder Besitzer von Features.
pub struct LayerNode {
    pub(crate) id: LayerId,
    pub(crate) parent: Option<LayerId>,
    pub(crate) children: Vec<LayerId>,
    pub(crate) container: bool,
    pub(crate) metadata: ValueCell<LayerMetadata>,
    pub(crate) checked_out: ValueCell<bool>,
    pub(crate) writeable: ValueCell<bool>,
    pub(crate) changed: ValueCell<bool>,
    pub(crate) checkout: CheckoutState,
    pub(crate) features: Arc<FeatureMap>,
    pub(crate) selection: IndexSet<FeatureId>,
    pub(crate) materialized: Vec<FeatureId>,
    pub(crate) draw_generation: u64,
    pub(crate) last_save_error: Option<String>,
    pub(crate) loader: Option<Arc<dyn LayerLoader>>,
    pub(crate) spatial: Option<SpatialIndex>,
    pub(crate) history: LayerHistory,
}

impl std::fmt::Debug for LayerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerNode")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("container", &self.container)
            .field("display_name", &self.metadata.get().display_name)
            .field("checkout", &self.checkout)
            .field("changed", self.changed.get())
            .field("features", &self.features.len())
            .finish()
    }
}

impl LayerNode {
    pub(crate) fn new(
        id: LayerId,
        parent: Option<LayerId>,
        metadata: LayerMetadata,
        container: bool,
        writeable: bool,
        loader: Option<Arc<dyn LayerLoader>>,
        undo_depth: usize,
    ) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            container,
            metadata: ValueCell::new(metadata),
            checked_out: ValueCell::new(false),
            writeable: ValueCell::new(writeable),
            changed: ValueCell::new(false),
            checkout: CheckoutState::Available,
            features: Arc::new(FeatureMap::new()),
            selection: IndexSet::new(),
            materialized: Vec::new(),
            draw_generation: 0,
            last_save_error: None,
            loader,
            spatial: None,
            history: LayerHistory::new_with_capacity(undo_depth),
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn parent(&self) -> Option<LayerId> {
        self.parent
    }

    /// Kind-Layer in Einfügereihenfolge.
    pub fn children(&self) -> &[LayerId] {
        &self.children
    }

    /// `true` für Container-Layer ohne eigene Geometrie.
    pub fn is_container(&self) -> bool {
        self.container
    }

    pub fn metadata(&self) -> &LayerMetadata {
        self.metadata.get()
    }

    pub fn is_checked_out(&self) -> bool {
        *self.checked_out.get()
    }

    pub fn is_writeable(&self) -> bool {
        *self.writeable.get()
    }

    pub fn is_changed(&self) -> bool {
        *self.changed.get()
    }

    pub fn checkout_state(&self) -> CheckoutState {
        self.checkout
    }

    /// Form neuer Features laut Loader (`None` ohne Loader oder bei Containern).
    pub fn feature_shape(&self) -> FeatureShape {
        match (&self.loader, self.container) {
            (Some(loader), false) => loader.feature_shape(),
            _ => FeatureShape::None,
        }
    }

    /// Alle Features in Einfügereihenfolge.
    pub fn features(&self) -> &FeatureMap {
        &self.features
    }

    pub fn feature(&self, id: FeatureId) -> Option<&FeatureNode> {
        self.features.get(&id)
    }

    /// Serialisierbare Form aller Features.
    pub fn feature_records(&self) -> Vec<FeatureRecord> {
        self.features.values().map(FeatureNode::to_record).collect()
    }

    /// Aktuelle Selektion des Layers.
    pub fn selection(&self) -> &IndexSet<FeatureId> {
        &self.selection
    }

    /// Zuletzt materialisierte Features (Ergebnis des letzten erfolgreichen `Draw`).
    pub fn materialized(&self) -> &[FeatureId] {
        &self.materialized
    }

    /// Zähler erfolgreicher Draws.
    pub fn draw_generation(&self) -> u64 {
        self.draw_generation
    }

    /// Letzter Speicherfehler; bleibt sichtbar bis zum nächsten erfolgreichen Save.
    pub fn last_save_error(&self) -> Option<&str> {
        self.last_save_error.as_deref()
    }

    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    pub fn history(&self) -> &LayerHistory {
        &self.history
    }

    pub(crate) fn source(&self) -> LayerSource {
        LayerSource {
            layer: self.id,
            metadata: self.metadata.get().clone(),
        }
    }

    /// O(1)-Snapshot der Features und der Selektion.
    /// Setzt den Checkpoint auf den aktuellen Stand und meldet ihn dem Loader.
    pub(crate) fn take_checkpoint(&mut self) {
        let snap = self.snapshot();
        self.history.set_checkpoint(snap);
        if let Some(loader) = &self.loader {
            loader.checkpoint(&self.source());
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            features: Arc::clone(&self.features),
            selection: self.selection.clone(),
        }
    }

    pub(crate) fn apply_snapshot(&mut self, snap: Snapshot) {
        self.features = snap.features;
        self.selection = snap.selection;
        self.selection.retain(|id| self.features.contains_key(id));
        self.spatial = None;
    }

    /// Schreibzugriff auf die Features (Copy-on-Write); verwirft den Spatial-Index.
    pub(crate) fn features_mut(&mut self) -> &mut FeatureMap {
        self.spatial = None;
        Arc::make_mut(&mut self.features)
    }

    /// Nächstes Feature dieses Layers; baut den Spatial-Index bei Bedarf neu.
    pub(crate) fn closest(
        &mut self,
        point: Vec3,
        exclude: &HashSet<FeatureId>,
    ) -> Option<SpatialMatch> {
        if self.container || self.features.is_empty() {
            return None;
        }
        let features = &self.features;
        let index = self
            .spatial
            .get_or_insert_with(|| SpatialIndex::from_features(features.values()));
        index.nearest(point, exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GeometryRecord;

    fn leaf() -> LayerNode {
        LayerNode::new(
            LayerId(1),
            None,
            LayerMetadata::named("Punkte"),
            false,
            true,
            None,
            8,
        )
    }

    fn point(id: u64, x: f32) -> FeatureNode {
        let record = FeatureRecord::new(GeometryRecord::Point {
            position: Vec3::new(x, 0.0, 0.0),
        });
        FeatureNode::from_record(FeatureId(id), &record, 1e-4).expect("Punkt")
    }

    #[test]
    fn test_checkout_state_reports_holder() {
        assert_eq!(CheckoutState::Available.holder(), None);
        assert_eq!(
            CheckoutState::Committing {
                holder: ReplicaId(4)
            }
            .holder(),
            Some(ReplicaId(4))
        );
    }

    #[test]
    fn test_features_mut_detaches_from_snapshot() {
        let mut layer = leaf();
        layer.features_mut().insert(FeatureId(1), point(1, 0.0));
        let snap = layer.snapshot();

        layer.features_mut().insert(FeatureId(2), point(2, 5.0));

        assert_eq!(snap.features.len(), 1);
        assert_eq!(layer.features().len(), 2);
        assert!(!snap.shares_features(&layer.features));
    }

    #[test]
    fn test_closest_rebuilds_index_after_mutation() {
        let mut layer = leaf();
        layer.features_mut().insert(FeatureId(1), point(1, 0.0));
        let first = layer
            .closest(Vec3::new(9.0, 0.0, 0.0), &HashSet::new())
            .expect("Treffer");
        assert_eq!(first.feature_id, FeatureId(1));

        layer.features_mut().insert(FeatureId(2), point(2, 10.0));
        let second = layer
            .closest(Vec3::new(9.0, 0.0, 0.0), &HashSet::new())
            .expect("Treffer");
        assert_eq!(second.feature_id, FeatureId(2));
    }

    #[test]
    fn test_apply_snapshot_drops_stale_selection() {
        let mut layer = leaf();
        let snap = layer.snapshot();
        layer.features_mut().insert(FeatureId(3), point(3, 1.0));
        layer.selection.insert(FeatureId(3));

        layer.apply_snapshot(snap);

        assert!(layer.selection().is_empty());
        assert!(layer.features().is_empty());
    }
}
