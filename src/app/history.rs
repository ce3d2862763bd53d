use super::layer::FeatureMap;
use indexmap::IndexSet;
use crate::core::FeatureId;
use std::sync::Arc;

/// Snapshot eines Layers, reduziert auf die für Undo/Redo relevanten Teile.
///
/// Nutzt Arc-Clone (Copy-on-Write): Das Erstellen eines Snapshots ist O(1),
/// der eigentliche Klon der Feature-Map findet erst beim nächsten
/// `Arc::make_mut()` in einem Use-Case statt.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Feature-Map (Arc-Klon für O(1)-Snapshot)
    pub features: Arc<FeatureMap>,
    /// Selektion zum Zeitpunkt des Snapshots
    pub selection: IndexSet<FeatureId>,
}

impl Snapshot {
    /// Gibt `true` zurück, wenn beide Snapshots dieselbe Feature-Map teilen.
    pub fn shares_features(&self, features: &Arc<FeatureMap>) -> bool {
        Arc::ptr_eq(&self.features, features)
    }
}

/// Undo/Redo-Manager eines Layers plus Checkpoint des letzten Commits.
#[derive(Debug, Default)]
pub struct LayerHistory {
    checkpoint: Option<Snapshot>,
    undo_stack: Vec<Snapshot>,
    redo_stack: Vec<Snapshot>,
    max_depth: usize,
}

impl LayerHistory {
    /// Erstellt einen neuen History-Manager mit maximaler Tiefe.
    pub fn new_with_capacity(max_depth: usize) -> Self {
        Self {
            checkpoint: None,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Setzt den wiederherstellbaren Stand (nach Laden, Commit, Session-Start).
    pub fn set_checkpoint(&mut self, snap: Snapshot) {
        self.checkpoint = Some(snap);
    }

    /// Letzter Checkpoint, falls vorhanden.
    pub fn checkpoint(&self) -> Option<&Snapshot> {
        self.checkpoint.as_ref()
    }

    /// Nimmt einen Snapshot vor einer Mutation auf; leert den Redo-Stack.
    pub fn record_snapshot(&mut self, snap: Snapshot) {
        if self.undo_stack.len() >= self.max_depth {
            self.undo_stack.remove(0);
        }
        self.undo_stack.push(snap);
        self.redo_stack.clear();
    }

    /// Prüft ob Undo möglich ist.
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Prüft ob Redo möglich ist.
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Pop undo stack and push `current` onto redo stack; returns the snapshot to apply.
    pub fn pop_undo_with_current(&mut self, current: Snapshot) -> Option<Snapshot> {
        let prev = self.undo_stack.pop()?;
        if self.redo_stack.len() >= self.max_depth {
            self.redo_stack.remove(0);
        }
        self.redo_stack.push(current);
        Some(prev)
    }

    /// Pop redo stack and push `current` onto undo stack; returns the snapshot to apply.
    pub fn pop_redo_with_current(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.redo_stack.pop()?;
        if self.undo_stack.len() >= self.max_depth {
            self.undo_stack.remove(0);
        }
        self.undo_stack.push(current);
        Some(next)
    }

    /// Verwirft Undo/Redo (beim Check-in); der Checkpoint bleibt.
    pub fn clear_edits(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
