//! Zentrale Konfiguration für den Layer-Editor.
//!
//! `EditorOptions` enthält alle zur Laufzeit änderbaren Werte.
//! Die `const`-Werte bleiben als Fallback/Default erhalten.

use serde::{Deserialize, Serialize};

// ── Geometrie ───────────────────────────────────────────────────────

/// Abstand, unterhalb dessen der letzte Ring-Vertex als Duplikat des ersten gilt.
pub const RING_CLOSE_EPSILON: f32 = 1e-4;

// ── Historie ────────────────────────────────────────────────────────

/// Maximale Undo-Tiefe pro Layer.
pub const UNDO_DEPTH: usize = 200;

// ── Replikation ─────────────────────────────────────────────────────

/// Puffergröße des Replikations-Broadcasts (Events pro Empfänger).
pub const REPLICATION_CAPACITY: usize = 1024;
/// Länge der Request-Queue der Authority.
pub const REQUEST_QUEUE_CAPACITY: usize = 64;
/// Anzahl protokollierter Requests im Request-Log.
pub const REQUEST_LOG_CAPACITY: usize = 500;

// ── Laufzeit-Optionen (serialisierbar) ─────────────────────────────

/// Alle zur Laufzeit änderbaren Editor-Optionen.
/// Wird als `gis_layer_editor.toml` neben der Binary gespeichert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditorOptions {
    // ── Geometrie ───────────────────────────────────────────────
    /// Epsilon für die Duplikat-Erkennung beim Schließen von Ringen
    pub ring_close_epsilon: f32,

    // ── Historie ────────────────────────────────────────────────
    /// Maximale Undo-/Redo-Tiefe pro ausgechecktem Layer
    pub undo_depth: usize,

    // ── Replikation ─────────────────────────────────────────────
    /// Broadcast-Kapazität; langsamere Replikas resynchronisieren per Snapshot
    pub replication_capacity: usize,
    /// Kapazität der Authority-Request-Queue
    pub request_queue_capacity: usize,
    /// Anzahl Einträge im Request-Log
    #[serde(default = "default_request_log_capacity")]
    pub request_log_capacity: usize,

    // ── Layer ───────────────────────────────────────────────────
    /// Beschreibbarkeit neuer Layer, falls die Projektbeschreibung nichts angibt
    pub default_layer_writeable: bool,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            ring_close_epsilon: RING_CLOSE_EPSILON,
            undo_depth: UNDO_DEPTH,
            replication_capacity: REPLICATION_CAPACITY,
            request_queue_capacity: REQUEST_QUEUE_CAPACITY,
            request_log_capacity: REQUEST_LOG_CAPACITY,
            default_layer_writeable: true,
        }
    }
}

fn default_request_log_capacity() -> usize {
    REQUEST_LOG_CAPACITY
}

impl EditorOptions {
    /// Lädt Optionen aus einer TOML-Datei. Fehlende Datei → Standardwerte.
    pub fn load_from_file(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(opts) => {
                    log::info!("Optionen geladen aus: {}", path.display());
                    opts
                }
                Err(e) => {
                    log::warn!("Optionen-Datei fehlerhaft, verwende Standardwerte: {}", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("Keine Optionen-Datei gefunden, verwende Standardwerte");
                Self::default()
            }
        }
    }

    /// Speichert Optionen als TOML-Datei.
    pub fn save_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        log::info!("Optionen gespeichert nach: {}", path.display());
        Ok(())
    }

    /// Ermittelt den Pfad zur Optionen-Datei neben der Binary.
    pub fn config_path() -> std::path::PathBuf {
        std::env::current_exe()
            .unwrap_or_else(|_| std::path::PathBuf::from("gis-layer-host"))
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("gis_layer_editor.toml")
    }

    /// Kapazitäten dürfen nie 0 sein (tokio-Kanäle verlangen >= 1).
    pub fn clamped(mut self) -> Self {
        self.replication_capacity = self.replication_capacity.max(1);
        self.request_queue_capacity = self.request_queue_capacity.max(1);
        self.request_log_capacity = self.request_log_capacity.max(1);
        self.undo_depth = self.undo_depth.max(1);
        if !self.ring_close_epsilon.is_finite() || self.ring_close_epsilon < 0.0 {
            self.ring_close_epsilon = RING_CLOSE_EPSILON;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("gis_layer_editor_missing_options.toml");
        let _ = std::fs::remove_file(&path);
        assert_eq!(EditorOptions::load_from_file(&path), EditorOptions::default());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "gis_layer_editor_options_{}.toml",
            std::process::id()
        ));
        let options = EditorOptions {
            undo_depth: 17,
            default_layer_writeable: false,
            ..EditorOptions::default()
        };

        options.save_to_file(&path).expect("speichern");
        let loaded = EditorOptions::load_from_file(&path);
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, options);
    }

    #[test]
    fn test_clamped_replaces_zero_capacities() {
        let options = EditorOptions {
            replication_capacity: 0,
            request_queue_capacity: 0,
            ring_close_epsilon: f32::NAN,
            ..EditorOptions::default()
        }
        .clamped();

        assert_eq!(options.replication_capacity, 1);
        assert_eq!(options.request_queue_capacity, 1);
        assert_eq!(options.ring_close_epsilon, RING_CLOSE_EPSILON);
    }
}
