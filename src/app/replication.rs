//! Replikations-Vertrag zwischen Authority und Replikas.
//!
//! Die Authority veröffentlicht jede Änderung einer autoritativen Zelle als
//! [`ReplicationEvent`] (mit vorherigem und neuem Wert). Replikas wenden die
//! Events auf ihren [`LayerMirror`] an und schreiben nie direkt.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::{
    FeatureId, FeatureRecord, FeatureShape, LayerId, LayerMetadata, ReplicaId, ValueChanged,
};

/// Vollständiger Zustand eines Layers beim Spawn auf einer Replika.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStateSnapshot {
    pub parent: Option<LayerId>,
    pub container: bool,
    pub metadata: LayerMetadata,
    pub checked_out: bool,
    pub writeable: bool,
    pub changed: bool,
    pub shape: FeatureShape,
}

/// Session-weite Ereignisse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Session gestartet; Layer nehmen einen Checkpoint.
    Started { by: ReplicaId },
    /// Session beendet; `saved=false` heißt verworfen.
    Stopped { saved: bool },
    LayerCheckedOut { layer: LayerId, holder: ReplicaId },
    LayerCheckedIn { layer: LayerId, committed: bool },
}

/// Eine Änderung am autoritativen Zustand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplicationEvent {
    LayerSpawned {
        layer: LayerId,
        state: LayerStateSnapshot,
    },
    LayerDespawned {
        layer: LayerId,
    },
    Metadata {
        layer: LayerId,
        change: ValueChanged<LayerMetadata>,
    },
    CheckedOut {
        layer: LayerId,
        change: ValueChanged<bool>,
    },
    Writeable {
        layer: LayerId,
        change: ValueChanged<bool>,
    },
    Changed {
        layer: LayerId,
        change: ValueChanged<bool>,
    },
    /// Alle Features eines Layers ersetzt (Laden, Rollback, Undo).
    FeaturesReplaced {
        layer: LayerId,
        features: Vec<FeatureRecord>,
    },
    FeatureUpdated {
        layer: LayerId,
        feature: FeatureRecord,
    },
    FeatureRemoved {
        layer: LayerId,
        feature: FeatureId,
    },
    Session(SessionEvent),
}

impl ReplicationEvent {
    /// Betroffener Layer, falls das Event layer-bezogen ist.
    pub fn layer(&self) -> Option<LayerId> {
        match self {
            Self::LayerSpawned { layer, .. }
            | Self::LayerDespawned { layer }
            | Self::Metadata { layer, .. }
            | Self::CheckedOut { layer, .. }
            | Self::Writeable { layer, .. }
            | Self::Changed { layer, .. }
            | Self::FeaturesReplaced { layer, .. }
            | Self::FeatureUpdated { layer, .. }
            | Self::FeatureRemoved { layer, .. } => Some(*layer),
            Self::Session(SessionEvent::LayerCheckedOut { layer, .. })
            | Self::Session(SessionEvent::LayerCheckedIn { layer, .. }) => Some(*layer),
            Self::Session(_) => None,
        }
    }
}

/// Read-only Kopie eines Layers auf einer Replika.
#[derive(Debug, Clone, PartialEq)]
pub struct MirroredLayer {
    pub id: LayerId,
    pub parent: Option<LayerId>,
    pub children: Vec<LayerId>,
    pub container: bool,
    pub metadata: LayerMetadata,
    pub checked_out: bool,
    pub writeable: bool,
    pub changed: bool,
    pub shape: FeatureShape,
    pub features: IndexMap<FeatureId, FeatureRecord>,
}

/// Spiegel des Session-Zustands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MirroredSession {
    pub active: bool,
    pub editable: Option<(LayerId, ReplicaId)>,
}

/// Eventual-konsistente Kopie des Layer-Baums auf einer Replika.
#[derive(Debug, Clone, Default)]
pub struct LayerMirror {
    layers: HashMap<LayerId, MirroredLayer>,
    roots: Vec<LayerId>,
    session: MirroredSession,
    applied: u64,
}

impl LayerMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verwirft alles (vor einer Resynchronisation per Snapshot).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn layer(&self, id: LayerId) -> Option<&MirroredLayer> {
        self.layers.get(&id)
    }

    pub fn roots(&self) -> &[LayerId] {
        &self.roots
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn session(&self) -> MirroredSession {
        self.session
    }

    /// Anzahl angewendeter Events seit dem letzten Reset.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Wendet ein Event an. Events für unbekannte Layer werden ignoriert.
    pub fn apply(&mut self, event: &ReplicationEvent) {
        self.applied += 1;
        match event {
            ReplicationEvent::LayerSpawned { layer, state } => self.spawn(*layer, state),
            ReplicationEvent::LayerDespawned { layer } => self.despawn(*layer),
            ReplicationEvent::Metadata { layer, change } => {
                if let Some(l) = self.layers.get_mut(layer) {
                    l.metadata = change.current.clone();
                }
            }
            ReplicationEvent::CheckedOut { layer, change } => {
                if let Some(l) = self.layers.get_mut(layer) {
                    l.checked_out = change.current;
                }
            }
            ReplicationEvent::Writeable { layer, change } => {
                if let Some(l) = self.layers.get_mut(layer) {
                    l.writeable = change.current;
                }
            }
            ReplicationEvent::Changed { layer, change } => {
                if let Some(l) = self.layers.get_mut(layer) {
                    l.changed = change.current;
                }
            }
            ReplicationEvent::FeaturesReplaced { layer, features } => {
                if let Some(l) = self.layers.get_mut(layer) {
                    l.features = features
                        .iter()
                        .filter_map(|f| f.id.map(|id| (id, f.clone())))
                        .collect();
                }
            }
            ReplicationEvent::FeatureUpdated { layer, feature } => {
                if let (Some(l), Some(id)) = (self.layers.get_mut(layer), feature.id) {
                    l.features.insert(id, feature.clone());
                }
            }
            ReplicationEvent::FeatureRemoved { layer, feature } => {
                if let Some(l) = self.layers.get_mut(layer) {
                    l.features.shift_remove(feature);
                }
            }
            ReplicationEvent::Session(session) => self.apply_session(session),
        }
    }

    fn apply_session(&mut self, event: &SessionEvent) {
        match *event {
            SessionEvent::Started { .. } => self.session.active = true,
            SessionEvent::Stopped { .. } => {
                self.session.active = false;
                self.session.editable = None;
            }
            SessionEvent::LayerCheckedOut { layer, holder } => {
                self.session.editable = Some((layer, holder));
            }
            SessionEvent::LayerCheckedIn { layer, .. } => {
                if matches!(self.session.editable, Some((held, _)) if held == layer) {
                    self.session.editable = None;
                }
            }
        }
    }

    fn spawn(&mut self, id: LayerId, state: &LayerStateSnapshot) {
        match state.parent {
            Some(parent) => {
                if let Some(p) = self.layers.get_mut(&parent) {
                    if !p.children.contains(&id) {
                        p.children.push(id);
                    }
                }
            }
            None => {
                if !self.roots.contains(&id) {
                    self.roots.push(id);
                }
            }
        }
        self.layers.insert(
            id,
            MirroredLayer {
                id,
                parent: state.parent,
                children: Vec::new(),
                container: state.container,
                metadata: state.metadata.clone(),
                checked_out: state.checked_out,
                writeable: state.writeable,
                changed: state.changed,
                shape: state.shape,
                features: IndexMap::new(),
            },
        );
    }

    fn despawn(&mut self, id: LayerId) {
        let Some(removed) = self.layers.remove(&id) else {
            return;
        };
        match removed.parent.and_then(|p| self.layers.get_mut(&p)) {
            Some(parent) => parent.children.retain(|c| *c != id),
            None => self.roots.retain(|r| *r != id),
        }
    }
}
