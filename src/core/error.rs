//! Fehler-Taxonomie des Editiermodells.
//!
//! Alle Varianten sind lokal und behebbar; keine davon beendet den Prozess.

use super::{FeatureId, LayerId, VertexId};
use thiserror::Error;

/// Fehler einer Geometrie-, Checkout- oder Session-Operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    /// Strukturelle Vorbedingung verletzt (z.B. Segment existiert nicht).
    #[error("ungueltige Topologie: {0}")]
    InvalidTopology(String),
    /// Die Operation würde die Mindest-Vertexanzahl unterschreiten.
    #[error("degenerierte Geometrie: {remaining} Vertices, Minimum {minimum}")]
    DegenerateGeometry { remaining: usize, minimum: usize },
    /// Mutation ohne aktiven Checkout des Anfragenden.
    #[error("Layer {0} ist fuer diesen Anfragenden nicht editierbar")]
    NotEditable(LayerId),
    /// Layer gehört bereits einem anderen Editor oder ist nicht beschreibbar.
    #[error("Layer {0} ist bereits ausgecheckt oder nicht beschreibbar")]
    AlreadyCheckedOut(LayerId),
    /// Ein anderer Layer ist bereits der editierbare Layer der Session.
    #[error("Layer {held} wird bereits editiert")]
    LayerAlreadyEditing { held: LayerId },
    /// `Start()` während einer laufenden Session.
    #[error("Edit-Session ist bereits aktiv")]
    SessionAlreadyActive,
    /// Session-Operation ohne laufende Session.
    #[error("keine aktive Edit-Session")]
    SessionNotActive,
    /// Loader-Fehler beim Initialisieren (wird still behandelt und nur geloggt).
    #[error("Laden von Layer {layer} fehlgeschlagen: {reason}")]
    LoadFailure { layer: LayerId, reason: String },
    /// Loader-Fehler beim Speichern; wird immer an den Aufrufer gemeldet.
    #[error("Speichern von Layer {layer} fehlgeschlagen: {reason}")]
    SaveFailure { layer: LayerId, reason: String },
    /// Unbekannte Layer-ID.
    #[error("unbekannter Layer {0}")]
    UnknownLayer(LayerId),
    /// Unbekannte Feature-ID.
    #[error("unbekanntes Feature {0}")]
    UnknownFeature(FeatureId),
    /// Unbekannte Vertex-ID innerhalb eines Features.
    #[error("unbekannter Vertex {vertex} in Feature {feature}")]
    UnknownVertex {
        feature: FeatureId,
        vertex: VertexId,
    },
    /// Der Authority-Actor ist nicht mehr erreichbar.
    #[error("Authority nicht erreichbar")]
    AuthorityUnavailable,
}

impl EditError {
    /// Kurzform für `InvalidTopology` mit formatierbarer Nachricht.
    pub fn topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology(message.into())
    }

    /// `true` für Konkurrenz-Fehler, bei denen der Anfragende warten oder wiederholen soll.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::AlreadyCheckedOut(_) | Self::LayerAlreadyEditing { .. } | Self::SessionAlreadyActive
        )
    }
}

/// Ergebnis-Alias für Editier-Operationen.
pub type EditResult<T> = Result<T, EditError>;
