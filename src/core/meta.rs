//! Replizierte Layer-Metadaten: Anzeigename, Sichtbarkeit, Transform, Symbologie.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Platzierung eines Layers relativ zu seinem Eltern-Layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for LayerTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl LayerTransform {
    /// Affine Matrix (Skalierung, dann Rotation, dann Verschiebung).
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// Eine benannte Stil-Einheit der Layer-Palette.
///
/// Features referenzieren Einheiten über ihren Index (`FeatureNode::style`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbologyUnit {
    pub name: String,
    /// RGBA-Farbe
    #[serde(default = "default_color")]
    pub color: [f32; 4],
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Freier Form-Bezeichner (z.B. "circle", "square")
    #[serde(default)]
    pub shape: Option<String>,
}

fn default_color() -> [f32; 4] {
    [1.0, 1.0, 1.0, 1.0]
}

fn default_scale() -> f32 {
    1.0
}

impl SymbologyUnit {
    /// Einheit mit Standardfarbe und -skalierung.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: default_color(),
            scale: default_scale(),
            shape: None,
        }
    }
}

/// Metadaten eines Layers; der autoritative Wert liegt bei der Authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub display_name: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub transform: LayerTransform,
    /// Palette, in die Features per Index zeigen
    #[serde(default)]
    pub symbology: Vec<SymbologyUnit>,
    /// Quellreferenz für den Loader (Pfad, URL)
    #[serde(default)]
    pub source: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl LayerMetadata {
    /// Sichtbare Metadaten mit Identitäts-Transform und leerer Palette.
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            visible: true,
            transform: LayerTransform::default(),
            symbology: Vec::new(),
            source: None,
        }
    }

    /// Sucht eine Stil-Einheit per Palettenindex.
    pub fn style(&self, index: usize) -> Option<&SymbologyUnit> {
        self.symbology.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults_when_fields_missing() {
        let meta: LayerMetadata =
            serde_json::from_str(r#"{"display_name":"Straßen"}"#).expect("gültiges JSON");

        assert!(meta.visible);
        assert_eq!(meta.transform, LayerTransform::default());
        assert!(meta.symbology.is_empty());
    }

    #[test]
    fn test_transform_matrix_applies_translation_after_scale() {
        let transform = LayerTransform {
            translation: Vec3::new(1.0, 0.0, 0.0),
            scale: Vec3::splat(2.0),
            ..LayerTransform::default()
        };

        let p = transform.to_matrix().transform_point3(Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(p, Vec3::new(3.0, 2.0, 0.0));
    }
}
