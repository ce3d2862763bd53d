//! Core-Domänentypen: IDs, Fehler, Vertex-Linien-Graph, Features, Spatial-Index.

pub mod cell;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod ids;
pub mod meta;
pub mod spatial;
/// Index- und Adjazenz-Verwaltung für Polylinien und Ringe
pub mod vertex_line;

pub use cell::{ValueCell, ValueChanged};
pub use error::{EditError, EditResult};
pub use feature::{
    FeatureNode, FeaturePart, FeatureRecord, MoveOp, MoveOutcome, VertexHandle, VertexRemoval,
};
pub use geometry::{DerivedGeometry, FeatureGeometry, FeatureShape, GeometryRecord, MeshPayload};
pub use ids::{FeatureId, IdAllocator, LayerId, ReplicaId, VertexId};
pub use meta::{LayerMetadata, LayerTransform, SymbologyUnit};
pub use spatial::{SpatialIndex, SpatialMatch};
pub use vertex_line::{LineSegment, LineVertex, SegmentHit, VertexLineGraph};
