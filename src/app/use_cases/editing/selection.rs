//! Use-Case: Selektion und Block-Move-Zustand.

use crate::app::EditorState;
use crate::core::{EditResult, FeatureId, LayerId, ReplicaId};

/// Ersetzt die Selektion des Layers; liefert die Anzahl selektierter Features.
pub fn select_features(
    state: &mut EditorState,
    by: ReplicaId,
    layer: LayerId,
    ids: &[FeatureId],
) -> EditResult<usize> {
    state.ensure_editable(layer, by)?;
    state.tree.select(layer, ids)
}

/// Schaltet den Block-Move eines Features (Feature ist selbst Selektionswurzel).
pub fn set_block_move(
    state: &mut EditorState,
    by: ReplicaId,
    layer: LayerId,
    feature: FeatureId,
    block_move: bool,
) -> EditResult<()> {
    state.ensure_editable(layer, by)?;
    state.tree.set_block_move(layer, feature, block_move)
}
