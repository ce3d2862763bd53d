//! Loader für JSON-Feature-Dateien (`{"features": [...]}`).
//!
//! Die Quellreferenz eines Layers ist ein Dateipfad, relativ zum
//! Projektverzeichnis. Polygon-Ringe werden mit wiederholtem Startpunkt
//! geschrieben; beim Laden schliesst der Ring-Aufbau diesen Duplikat-Vertex.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::app::loader::{LayerLoader, LayerSource};
use crate::core::{FeatureRecord, FeatureShape};

/// Dateiinhalt einer Feature-Quelle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollectionFile {
    #[serde(default)]
    pub features: Vec<FeatureRecord>,
}

impl FeatureCollectionFile {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Fehler beim Parsen der Feature-Datei")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Fehler beim Serialisieren der Features")
    }
}

/// Liest und schreibt Features einer Form aus JSON-Dateien.
#[derive(Debug, Clone)]
pub struct JsonFeatureLoader {
    shape: FeatureShape,
    base_dir: Arc<PathBuf>,
}

impl JsonFeatureLoader {
    /// Loader für Features der Form `shape`; Pfade relativ zu `base_dir`.
    pub fn new(shape: FeatureShape, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            shape,
            base_dir: Arc::new(base_dir.into()),
        }
    }

    /// Absoluter Pfad der Quelle eines Layers.
    pub fn resolve(&self, source: &LayerSource) -> Result<PathBuf> {
        let uri = source
            .uri()
            .with_context(|| format!("Layer {} hat keine Quelle", source.layer))?;
        Ok(resolve_path(&self.base_dir, uri))
    }
}

fn resolve_path(base_dir: &Path, uri: &str) -> PathBuf {
    let path = Path::new(uri);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

impl LayerLoader for JsonFeatureLoader {
    fn feature_shape(&self) -> FeatureShape {
        self.shape
    }

    fn init(&self, source: LayerSource) -> BoxFuture<'static, Result<Vec<FeatureRecord>>> {
        let path = match self.resolve(&source) {
            Ok(path) => path,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        async move {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Feature-Datei nicht lesbar: {}", path.display()))?;
            let file = FeatureCollectionFile::from_json(&content)
                .with_context(|| format!("Feature-Datei fehlerhaft: {}", path.display()))?;
            log::info!(
                "{} Features geladen aus: {}",
                file.features.len(),
                path.display()
            );
            Ok(file.features)
        }
        .boxed()
    }

    fn draw(
        &self,
        source: LayerSource,
        features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, Result<()>> {
        log::debug!(
            "Layer {} ({}): {} Features materialisiert",
            source.layer,
            source.metadata.display_name,
            features.len()
        );
        future::ready(Ok(())).boxed()
    }

    fn save(
        &self,
        source: LayerSource,
        features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, Result<()>> {
        let path = match self.resolve(&source) {
            Ok(path) => path,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        async move {
            let content = FeatureCollectionFile { features }.to_json()?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Verzeichnis nicht anlegbar: {}", parent.display()))?;
            }
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("Feature-Datei nicht schreibbar: {}", path.display()))?;
            log::info!("Features gespeichert nach: {}", path.display());
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GeometryRecord, LayerId, LayerMetadata};
    use glam::Vec3;

    fn source(uri: Option<&str>) -> LayerSource {
        let mut metadata = LayerMetadata::named("Flächen");
        metadata.source = uri.map(str::to_string);
        LayerSource {
            layer: LayerId(1),
            metadata,
        }
    }

    #[test]
    fn test_relative_source_resolves_against_project_dir() {
        let loader = JsonFeatureLoader::new(FeatureShape::Polygon, "/projekte/stadt");
        let path = loader.resolve(&source(Some("daten/flaechen.json"))).expect("Pfad");
        assert_eq!(path, PathBuf::from("/projekte/stadt/daten/flaechen.json"));
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let loader = JsonFeatureLoader::new(FeatureShape::Point, ".");
        assert!(loader.resolve(&source(None)).is_err());
    }

    #[test]
    fn test_feature_file_parses_tagged_geometry() {
        let json = r#"{
            "features": [
                {"geometry": {"type": "point", "position": [1.0, 2.0, 3.0]}, "style": 0},
                {"geometry": {"type": "line_string", "positions": [[0,0,0],[1,0,0]]}}
            ]
        }"#;
        let file = FeatureCollectionFile::from_json(json).expect("gültiges JSON");

        assert_eq!(file.features.len(), 2);
        assert_eq!(
            file.features[0].geometry,
            GeometryRecord::Point {
                position: Vec3::new(1.0, 2.0, 3.0)
            }
        );
        assert_eq!(file.features[0].style, Some(0));
        assert_eq!(file.features[1].geometry.shape(), FeatureShape::Line);
    }

    #[tokio::test]
    async fn test_init_of_missing_file_fails() {
        let dir = std::env::temp_dir().join("gis_layer_editor_missing_source");
        let loader = JsonFeatureLoader::new(FeatureShape::Point, &dir);
        let result = loader.init(source(Some("gibt_es_nicht.json"))).await;
        assert!(result.is_err());
    }
}
