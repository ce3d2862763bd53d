//! Projektbeschreibung: Layer-Hierarchie mit Metadaten und Quellen.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::json_loader::JsonFeatureLoader;
use crate::app::layer_tree::{LayerSpec, LayerTree};
use crate::core::{FeatureShape, LayerId, LayerMetadata, LayerTransform, SymbologyUnit};
use crate::shared::EditorOptions;

/// Ein Layer der Projektbeschreibung.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<LayerId>,
    pub display_name: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub transform: LayerTransform,
    #[serde(default)]
    pub symbology: Vec<SymbologyUnit>,
    /// `None` übernimmt `default_layer_writeable` aus den Optionen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writeable: Option<bool>,
    /// Pfad der Feature-Datei, relativ zum Projektverzeichnis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// `none` für Container
    #[serde(default)]
    pub shape: FeatureShape,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LayerDescription>,
}

fn default_visible() -> bool {
    true
}

impl LayerDescription {
    /// Container haben Kinder oder keine Feature-Form.
    pub fn is_container(&self) -> bool {
        !self.children.is_empty() || self.shape == FeatureShape::None
    }

    fn metadata(&self) -> LayerMetadata {
        LayerMetadata {
            display_name: self.display_name.clone(),
            visible: self.visible,
            transform: self.transform,
            symbology: self.symbology.clone(),
            source: self.source.clone(),
        }
    }
}

/// Wurzel einer Projektdatei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDescription {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<LayerDescription>,
}

impl ProjectDescription {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Fehler beim Parsen der Projektbeschreibung")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Fehler beim Serialisieren des Projekts")
    }

    /// Liest eine Projektdatei.
    pub async fn read(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Projektdatei nicht lesbar: {}", path.display()))?;
        let project = Self::from_json(&content)?;
        log::info!(
            "Projekt '{}' geladen aus: {} ({} Wurzel-Layer)",
            project.name,
            path.display(),
            project.layers.len()
        );
        Ok(project)
    }

    /// Anzahl aller beschriebenen Layer.
    pub fn layer_count(&self) -> usize {
        fn count(layers: &[LayerDescription]) -> usize {
            layers.iter().map(|l| 1 + count(&l.children)).sum()
        }
        count(&self.layers)
    }

    /// Baut den Layer-Baum; Feature-Quellen werden relativ zu `base_dir` aufgelöst.
    ///
    /// Die Features selbst werden erst durch `load` gelesen.
    pub fn build_tree(&self, base_dir: &Path, options: &EditorOptions) -> Result<LayerTree> {
        let mut tree = LayerTree::new(options);
        // Explizite IDs zuerst, damit keine automatische ID sie belegt
        reserve_explicit_ids(&mut tree, &self.layers);
        for layer in &self.layers {
            add_described(&mut tree, None, layer, base_dir, options)?;
        }
        Ok(tree)
    }
}

fn reserve_explicit_ids(tree: &mut LayerTree, layers: &[LayerDescription]) {
    for layer in layers {
        if let Some(id) = layer.id {
            tree.reserve_layer_id(id);
        }
        reserve_explicit_ids(tree, &layer.children);
    }
}

fn add_described(
    tree: &mut LayerTree,
    parent: Option<LayerId>,
    description: &LayerDescription,
    base_dir: &Path,
    options: &EditorOptions,
) -> Result<LayerId> {
    if description.is_container() && description.source.is_some() {
        bail!(
            "Container-Layer '{}' darf keine Feature-Quelle haben",
            description.display_name
        );
    }

    let mut spec = if description.is_container() {
        LayerSpec::container(description.metadata())
    } else {
        let loader = JsonFeatureLoader::new(description.shape, base_dir);
        LayerSpec::leaf(description.metadata(), Arc::new(loader))
    };
    spec = spec.with_writeable(
        description
            .writeable
            .unwrap_or(options.default_layer_writeable),
    );
    if let Some(id) = description.id {
        spec = spec.with_id(id);
    }

    let id = tree
        .add_layer(parent, spec)
        .with_context(|| format!("Layer '{}' ungültig", description.display_name))?;
    for child in &description.children {
        add_described(tree, Some(id), child, base_dir, options)?;
    }
    Ok(id)
}
