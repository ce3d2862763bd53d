//! Use-Case: Vertex in eine Linie oder ein Polygon einfügen.

use crate::app::EditorState;
use crate::core::{EditResult, FeatureId, LayerId, ReplicaId, VertexHandle};
use glam::Vec3;

/// Fügt an `position` einen Vertex auf dem nächstgelegenen Segment des Features ein.
///
/// Markiert den Layer (und alle Vorfahren) als geändert.
pub fn add_vertex(
    state: &mut EditorState,
    by: ReplicaId,
    layer: LayerId,
    feature: FeatureId,
    position: Vec3,
) -> EditResult<VertexHandle> {
    state.ensure_editable(layer, by)?;

    let handle = state
        .tree
        .mutate_feature(layer, feature, |f| f.add_vertex(position))?;
    log::debug!(
        "Vertex {} in Feature {} eingefügt (Index {})",
        handle.vertex,
        feature,
        handle.index
    );
    Ok(handle)
}
