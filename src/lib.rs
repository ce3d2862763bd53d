//! GIS Layer Editor Library.
//! Kollaboratives Editiermodell (Layer-Baum, Checkout, Vertex-Editor) als Library
//! exportiert für Host, Tests und Wiederverwendung.

pub mod app;
pub mod core;
pub mod io;
pub mod shared;

pub use app::{
    spawn_authority, AuthorityHandle, CheckinMode, EditReply, EditRequest,
    EditSessionController, EditorState, LayerLoader, LayerMirror, LayerSpec, LayerTree,
    MemoryLoader, Replica, ReplicationEvent, RequestController, SessionEvent,
};
pub use core::{
    EditError, EditResult, FeatureId, FeatureNode, FeaturePart, FeatureRecord, FeatureShape,
    GeometryRecord, LayerId, LayerMetadata, MoveOp, ReplicaId, SpatialIndex, SpatialMatch,
    VertexId, VertexLineGraph,
};
pub use io::{JsonFeatureLoader, ProjectDescription};
pub use shared::EditorOptions;
