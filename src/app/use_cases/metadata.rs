//! Use-Case: Layer-Metadaten ändern (Name, Sichtbarkeit, Transform, Palette).

use crate::app::EditorState;
use crate::core::{EditError, EditResult, LayerId, LayerMetadata, ReplicaId};

/// Setzt neue Metadaten; nur erlaubt, solange keine andere Replika den Layer hält.
pub fn set_metadata(
    state: &mut EditorState,
    by: ReplicaId,
    layer: LayerId,
    metadata: LayerMetadata,
) -> EditResult<()> {
    let node = state.tree.layer(layer)?;
    if let Some(holder) = node.checkout_state().holder() {
        if holder != by {
            return Err(EditError::NotEditable(layer));
        }
    }
    state.tree.set_metadata(layer, metadata)
}
