//! Geteilte Laufzeit-Konfiguration für `app`, `io` und die Host-Binary.

pub mod options;

pub use options::EditorOptions;
pub use options::{RING_CLOSE_EPSILON, UNDO_DEPTH};
