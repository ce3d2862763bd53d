//! Projekt- und Feature-Dateien.
//!
//! Projektbeschreibungen (JSON) ergeben einen Layer-Baum, dessen Feature-Layer
//! ihre Features über [`JsonFeatureLoader`] aus JSON-Dateien lesen und schreiben.

pub mod json_loader;
pub mod project;

pub use json_loader::{FeatureCollectionFile, JsonFeatureLoader};
pub use project::{LayerDescription, ProjectDescription};
