//! Use-Case: Neues Feature anlegen.

use crate::app::EditorState;
use crate::core::{EditError, EditResult, FeatureId, FeatureRecord, GeometryRecord, LayerId, ReplicaId};

/// Legt ein Feature mit `geometry` an; der Loader des Layers prüft die Form.
///
/// `style` muss, falls gesetzt, in die Palette des Layers zeigen.
pub fn add_feature(
    state: &mut EditorState,
    by: ReplicaId,
    layer: LayerId,
    geometry: GeometryRecord,
    style: Option<usize>,
) -> EditResult<FeatureId> {
    state.ensure_editable(layer, by)?;

    let node = state.tree.layer(layer)?;
    if let Some(index) = style {
        if node.metadata().style(index).is_none() {
            return Err(EditError::topology(format!(
                "Stil {index} fehlt in der Palette von Layer {layer}"
            )));
        }
    }
    let mut record = match &node.loader {
        Some(loader) => loader.build_feature(geometry)?,
        None => FeatureRecord::new(geometry),
    };
    record.style = style;

    let id = state.tree.insert_feature(layer, &record)?;
    log::info!("Feature {} in Layer {} angelegt", id, layer);
    Ok(id)
}
