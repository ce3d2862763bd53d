//! Application-Layer: Layer-Baum, Session, Replikation, Authority und Use-Cases.

pub mod authority;
pub mod command_log;
pub mod controller;
pub mod events;
pub mod history;
pub mod layer;
pub mod layer_tree;
pub mod loader;
pub mod replica;
pub mod replication;
pub mod session;
/// Autoritativer Editor-Zustand
///
/// Dieses Modul bündelt alles, was die Authority exklusiv besitzt (Baum, Session, Log).
pub mod state;
pub mod use_cases;

pub use authority::{spawn_authority, AuthorityHandle, Subscription, AUTHORITY_REPLICA};
pub use command_log::{LoggedRequest, RequestLog};
pub use controller::RequestController;
pub use events::{EditReply, EditRequest};
pub use history::LayerHistory;
pub use layer::{CheckoutState, FeatureMap, LayerNode};
pub use layer_tree::{LayerSpec, LayerTree};
pub use loader::{LayerLoader, LayerSource, MemoryLoader};
pub use replica::Replica;
pub use replication::{LayerMirror, MirroredLayer, MirroredSession, ReplicationEvent, SessionEvent};
pub use session::{CheckinMode, EditSessionController};
pub use state::EditorState;
pub use use_cases::editing::{MoveResult, RemoveVertexResult};
