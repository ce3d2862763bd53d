//! Use-Case: Feature, Vertex-Handle oder Selektion transformieren.

use crate::app::EditorState;
use crate::core::{EditError, EditResult, FeatureId, FeaturePart, LayerId, MoveOp, MoveOutcome, ReplicaId};

/// Wer die Transformation übernommen hat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    /// Das Feature selbst (Block-Move oder Vertex-Handle)
    Absorbed,
    /// Der Layer hat die Selektion bewegt; Anzahl bewegter Features
    Selection(usize),
}

/// Wendet `op` auf `part` des Features an.
///
/// Ein Feature im Block-Move übernimmt die Transformation selbst. Sonst geht
/// sie an den Layer: ist das Feature selektiert, wird die ganze Selektion
/// bewegt, andernfalls nur das Feature.
pub fn move_feature(
    state: &mut EditorState,
    by: ReplicaId,
    layer: LayerId,
    feature: FeatureId,
    part: FeaturePart,
    op: MoveOp,
) -> EditResult<MoveResult> {
    state.ensure_editable(layer, by)?;

    let node = state.tree.layer(layer)?;
    let target = node
        .feature(feature)
        .ok_or(EditError::UnknownFeature(feature))?;

    let forwarded = match part {
        FeaturePart::Whole if !target.block_move() => Some(op),
        _ => None,
    };

    match forwarded {
        None => {
            let outcome = state
                .tree
                .mutate_feature(layer, feature, |f| f.apply_move(part, op))?;
            debug_assert_eq!(outcome, MoveOutcome::Absorbed);
            Ok(MoveResult::Absorbed)
        }
        Some(op) => {
            // `MoveTo` verschiebt die Selektion starr, Anker ist das angefragte Feature
            let op = match op {
                MoveOp::MoveTo(position) => {
                    MoveOp::Translate(position - target.derived().centroid)
                }
                other => other,
            };
            let targets: Vec<FeatureId> = if node.selection().contains(&feature) {
                node.selection().iter().copied().collect()
            } else {
                vec![feature]
            };
            let moved = state
                .tree
                .mutate_features(layer, &targets, |f| f.move_whole(op))?;
            log::debug!("{} Features in Layer {} bewegt", moved, layer);
            Ok(MoveResult::Selection(moved))
        }
    }
}
