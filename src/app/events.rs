//! Requests an die Authority und ihre Antworten.

use glam::Vec3;

use super::session::CheckinMode;
use super::use_cases::editing::{MoveResult, RemoveVertexResult};
use crate::core::{
    FeatureId, FeaturePart, GeometryRecord, LayerId, LayerMetadata, MoveOp, SpatialMatch,
    VertexHandle, VertexId,
};

/// Ein Request einer Replika; ausgeführt wird er nur auf der Authority.
#[derive(Debug, Clone)]
pub enum EditRequest {
    /// `true` checkt aus, `false` checkt mit Commit ein
    Checkout { layer: LayerId, checkout: bool },
    /// Check-in mit explizitem Modus
    Checkin { layer: LayerId, mode: CheckinMode },
    /// Geänderte Features persistieren (Checkout bleibt bestehen)
    Save { layer: LayerId },
    StartSession,
    StopAndSave,
    StopAndDiscard,
    AddVertex {
        layer: LayerId,
        feature: FeatureId,
        position: Vec3,
    },
    RemoveVertex {
        layer: LayerId,
        feature: FeatureId,
        vertex: VertexId,
    },
    MoveFeature {
        layer: LayerId,
        feature: FeatureId,
        part: FeaturePart,
        op: MoveOp,
    },
    AddFeature {
        layer: LayerId,
        geometry: GeometryRecord,
        style: Option<usize>,
    },
    DeleteFeature { layer: LayerId, feature: FeatureId },
    SelectFeatures { layer: LayerId, ids: Vec<FeatureId> },
    SetBlockMove {
        layer: LayerId,
        feature: FeatureId,
        block_move: bool,
    },
    Undo { layer: LayerId },
    Redo { layer: LayerId },
    SetMetadata {
        layer: LayerId,
        metadata: LayerMetadata,
    },
    /// Teilbaum (neu) laden
    Load { layer: LayerId },
    /// Geänderte Layer im Teilbaum neu zeichnen
    Draw { layer: LayerId },
    /// Teilbaum zerstören
    DestroyLayer { layer: LayerId },
    GetClosest {
        layer: LayerId,
        point: Vec3,
        exclude: Vec<FeatureId>,
    },
}

impl EditRequest {
    /// Kurzname für das Request-Log.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Checkout { checkout: true, .. } => "checkout",
            Self::Checkout { checkout: false, .. } => "checkin",
            Self::Checkin {
                mode: CheckinMode::Commit,
                ..
            } => "checkin",
            Self::Checkin {
                mode: CheckinMode::Discard,
                ..
            } => "checkin_discard",
            Self::Save { .. } => "save",
            Self::StartSession => "start_session",
            Self::StopAndSave => "stop_and_save",
            Self::StopAndDiscard => "stop_and_discard",
            Self::AddVertex { .. } => "add_vertex",
            Self::RemoveVertex { .. } => "remove_vertex",
            Self::MoveFeature { .. } => "move_feature",
            Self::AddFeature { .. } => "add_feature",
            Self::DeleteFeature { .. } => "delete_feature",
            Self::SelectFeatures { .. } => "select_features",
            Self::SetBlockMove { .. } => "set_block_move",
            Self::Undo { .. } => "undo",
            Self::Redo { .. } => "redo",
            Self::SetMetadata { .. } => "set_metadata",
            Self::Load { .. } => "load",
            Self::Draw { .. } => "draw",
            Self::DestroyLayer { .. } => "destroy_layer",
            Self::GetClosest { .. } => "get_closest",
        }
    }

    /// Betroffener Layer, falls der Request layer-bezogen ist.
    pub fn layer(&self) -> Option<LayerId> {
        match self {
            Self::StartSession | Self::StopAndSave | Self::StopAndDiscard => None,
            Self::Checkout { layer, .. }
            | Self::Checkin { layer, .. }
            | Self::Save { layer }
            | Self::AddVertex { layer, .. }
            | Self::RemoveVertex { layer, .. }
            | Self::MoveFeature { layer, .. }
            | Self::AddFeature { layer, .. }
            | Self::DeleteFeature { layer, .. }
            | Self::SelectFeatures { layer, .. }
            | Self::SetBlockMove { layer, .. }
            | Self::Undo { layer }
            | Self::Redo { layer }
            | Self::SetMetadata { layer, .. }
            | Self::Load { layer }
            | Self::Draw { layer }
            | Self::DestroyLayer { layer }
            | Self::GetClosest { layer, .. } => Some(*layer),
        }
    }

    /// `true` für Requests, die Features des Layers lesen oder ändern und
    /// daher auf einen ausstehenden Load warten müssen.
    pub fn needs_loaded_layer(&self) -> bool {
        !matches!(
            self,
            Self::StartSession
                | Self::StopAndSave
                | Self::StopAndDiscard
                | Self::Load { .. }
                | Self::DestroyLayer { .. }
                | Self::SetMetadata { .. }
        )
    }
}

/// Antwort der Authority auf einen erfolgreichen Request.
#[derive(Debug, Clone, PartialEq)]
pub enum EditReply {
    Done,
    Vertex(VertexHandle),
    VertexRemoved(RemoveVertexResult),
    Moved(MoveResult),
    Feature(FeatureId),
    Selected(usize),
    /// Undo/Redo: ob ein Schritt angewendet wurde
    Stepped(bool),
    Closest(Option<(LayerId, SpatialMatch)>),
}
