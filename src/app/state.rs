//! Autoritativer Editor-Zustand: Layer-Baum, Session und Request-Log.

use super::command_log::RequestLog;
use super::layer_tree::LayerTree;
use super::session::EditSessionController;
use crate::core::{EditResult, LayerId, ReplicaId};
use crate::shared::EditorOptions;

/// Gesamter Zustand, den die Authority exklusiv besitzt.
pub struct EditorState {
    /// Alle Layer und Features
    pub tree: LayerTree,
    /// Edit-Session und editierbarer Layer
    pub session: EditSessionController,
    /// Verarbeitete Requests
    pub request_log: RequestLog,
    /// Laufzeit-Optionen
    pub options: EditorOptions,
}

impl EditorState {
    /// Leerer Zustand ohne Layer.
    pub fn new(options: EditorOptions) -> Self {
        let options = options.clamped();
        Self {
            tree: LayerTree::new(&options),
            session: EditSessionController::new(),
            request_log: RequestLog::new(options.request_log_capacity),
            options,
        }
    }

    /// Zustand mit bereits aufgebautem Baum.
    pub fn with_tree(tree: LayerTree, options: EditorOptions) -> Self {
        let options = options.clamped();
        Self {
            tree,
            session: EditSessionController::new(),
            request_log: RequestLog::new(options.request_log_capacity),
            options,
        }
    }

    /// Mutationen nur mit aktiver Session und eigenem Checkout.
    pub fn ensure_editable(&self, layer: LayerId, by: ReplicaId) -> EditResult<()> {
        self.session.ensure_editable(&self.tree, layer, by)
    }
}
