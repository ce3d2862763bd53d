//! Use-Case: Undo/Redo innerhalb des Checkouts.

use crate::app::EditorState;
use crate::core::{EditResult, LayerId, ReplicaId};

/// Macht den letzten Edit rückgängig; `false`, wenn der Undo-Stack leer ist.
pub fn undo(state: &mut EditorState, by: ReplicaId, layer: LayerId) -> EditResult<bool> {
    state.ensure_editable(layer, by)?;
    state.tree.undo(layer)
}

/// Stellt den zuletzt rückgängig gemachten Edit wieder her.
pub fn redo(state: &mut EditorState, by: ReplicaId, layer: LayerId) -> EditResult<bool> {
    state.ensure_editable(layer, by)?;
    state.tree.redo(layer)
}
