//! Use-Case-Funktionen für Feature- und Vertex-Editing.
//!
//! Jede Funktion prüft zuerst, ob der Anfragende den Layer editieren darf
//! (aktive Session und eigener Checkout), und mutiert dann atomar.
//!
//! Aufgeteilt nach Operation:
//! - `add_vertex` — Vertex auf dem nächsten Segment einfügen
//! - `remove_vertex` — Vertex entfernen, bei Unterschreitung Feature löschen
//! - `move_feature` — Translate/MoveAxis/MoveTo auf Feature, Vertex oder Selektion
//! - `add_feature` — Neues Feature passend zur Layer-Form anlegen
//! - `delete_feature` — Feature löschen
//! - `selection` — Selektion und Block-Move-Zustand
//! - `undo` — Undo/Redo des ausgecheckten Layers

mod add_feature;
mod add_vertex;
mod delete_feature;
mod move_feature;
mod remove_vertex;
mod selection;
mod undo;

pub use add_feature::add_feature;
pub use add_vertex::add_vertex;
pub use delete_feature::delete_feature;
pub use move_feature::{move_feature, MoveResult};
pub use remove_vertex::{remove_vertex, RemoveVertexResult};
pub use selection::{select_features, set_block_move};
pub use undo::{redo, undo};
