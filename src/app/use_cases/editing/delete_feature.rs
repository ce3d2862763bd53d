//! Use-Case: Feature löschen.

use crate::app::EditorState;
use crate::core::{EditResult, FeatureId, LayerId, ReplicaId};

/// Löscht ein Feature des ausgecheckten Layers.
pub fn delete_feature(
    state: &mut EditorState,
    by: ReplicaId,
    layer: LayerId,
    feature: FeatureId,
) -> EditResult<()> {
    state.ensure_editable(layer, by)?;
    state.tree.remove_feature(layer, feature)?;
    log::info!("Feature {} aus Layer {} gelöscht", feature, layer);
    Ok(())
}
