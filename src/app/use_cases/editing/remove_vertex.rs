//! Use-Case: Vertex entfernen; degenerierte Features werden gelöscht.

use crate::app::EditorState;
use crate::core::{EditError, EditResult, FeatureId, LayerId, ReplicaId, VertexId, VertexRemoval};

/// Was beim Entfernen tatsächlich passiert ist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoveVertexResult {
    /// Vertex (oder degeneriertes Loch) entfernt
    Removed(VertexRemoval),
    /// Minimum unterschritten: das ganze Feature wurde gelöscht
    FeatureDeleted,
}

/// Entfernt einen Vertex-Handle.
///
/// Würde die Geometrie ihr Minimum unterschreiten, wird stattdessen das
/// Feature gelöscht (Policy, kein Fehler).
pub fn remove_vertex(
    state: &mut EditorState,
    by: ReplicaId,
    layer: LayerId,
    feature: FeatureId,
    vertex: VertexId,
) -> EditResult<RemoveVertexResult> {
    state.ensure_editable(layer, by)?;

    match state
        .tree
        .mutate_feature(layer, feature, |f| f.remove_vertex(vertex))
    {
        Ok(removal) => Ok(RemoveVertexResult::Removed(removal)),
        Err(EditError::DegenerateGeometry { remaining, minimum }) => {
            log::info!(
                "Feature {} hätte {} von mindestens {} Vertices, wird gelöscht",
                feature,
                remaining,
                minimum
            );
            state.tree.remove_feature(layer, feature)?;
            Ok(RemoveVertexResult::FeatureDeleted)
        }
        Err(other) => Err(other),
    }
}
