//! Spatial-Index (KD-Tree) für Nächster-Nachbar-Abfragen über Feature-Vertices.

use std::collections::HashSet;

use glam::Vec3;
use kiddo::{KdTree, SquaredEuclidean};

use super::{FeatureId, FeatureNode, VertexId};

/// Ergebnis einer Distanzabfrage gegen den Spatial-Index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialMatch {
    /// ID des gefundenen Features
    pub feature_id: FeatureId,
    /// Getroffener Vertex-Handle (`None` bei Mesh-Schwerpunkten)
    pub vertex: Option<VertexId>,
    /// Position des Treffers
    pub position: Vec3,
    /// Euklidische Distanz zum Suchpunkt
    pub distance: f32,
}

#[derive(Debug, Clone, Copy)]
struct SpatialEntry {
    feature_id: FeatureId,
    vertex: Option<VertexId>,
    position: Vec3,
}

/// Read-only Spatial-Index über allen Vertex-Handles einer Feature-Menge.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    tree: KdTree<f64, 3>,
    entries: Vec<SpatialEntry>,
}

impl SpatialIndex {
    /// Erstellt einen leeren Spatial-Index.
    pub fn empty() -> Self {
        Self {
            tree: (&Vec::<[f64; 3]>::new()).into(),
            entries: Vec::new(),
        }
    }

    /// Baut einen neuen Index aus den übergebenen Features.
    ///
    /// Linien und Polygone tragen jeden Vertex ein, Meshes nur ihren Schwerpunkt.
    pub fn from_features<'a>(features: impl IntoIterator<Item = &'a FeatureNode>) -> Self {
        let mut entries = Vec::new();
        for feature in features {
            let handles = feature.handles();
            if handles.is_empty() {
                entries.push(SpatialEntry {
                    feature_id: feature.id(),
                    vertex: None,
                    position: feature.derived().centroid,
                });
                continue;
            }
            entries.extend(handles.into_iter().map(|h| SpatialEntry {
                feature_id: feature.id(),
                vertex: Some(h.vertex),
                position: h.position,
            }));
        }

        let points: Vec<[f64; 3]> = entries.iter().map(|e| to_point(e.position)).collect();
        let tree: KdTree<f64, 3> = (&points).into();

        Self { tree, entries }
    }

    /// Gibt die Anzahl indexierter Einträge zurück.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Gibt `true` zurück, wenn keine Einträge im Index liegen.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Findet den nächsten Eintrag, dessen Feature nicht in `exclude` liegt.
    pub fn nearest(&self, query: Vec3, exclude: &HashSet<FeatureId>) -> Option<SpatialMatch> {
        if self.is_empty() {
            return None;
        }

        let result = self.tree.nearest_one::<SquaredEuclidean>(&to_point(query));
        let entry = self.entries.get(result.item as usize)?;
        if !exclude.contains(&entry.feature_id) {
            return Some(to_match(entry, (result.distance as f32).sqrt()));
        }

        // Bestes Ergebnis ist ausgeschlossen: linearer Fallback über die Restmenge
        self.entries
            .iter()
            .filter(|e| !exclude.contains(&e.feature_id))
            .map(|e| to_match(e, e.position.distance(query)))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Findet alle Einträge innerhalb eines Radius um die Query-Position.
    pub fn within_radius(&self, query: Vec3, radius: f32) -> Vec<SpatialMatch> {
        if self.is_empty() || radius.is_sign_negative() {
            return Vec::new();
        }

        let mut results = self
            .tree
            .within::<SquaredEuclidean>(&to_point(query), (radius * radius) as f64)
            .into_iter()
            .filter_map(|found| {
                let entry = self.entries.get(found.item as usize)?;
                Some(to_match(entry, (found.distance as f32).sqrt()))
            })
            .collect::<Vec<_>>();

        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        results
    }
}

fn to_point(p: Vec3) -> [f64; 3] {
    [p.x as f64, p.y as f64, p.z as f64]
}

fn to_match(entry: &SpatialEntry, distance: f32) -> SpatialMatch {
    SpatialMatch {
        feature_id: entry.feature_id,
        vertex: entry.vertex,
        position: entry.position,
        distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FeatureRecord, GeometryRecord};

    fn point(id: u64, position: Vec3) -> FeatureNode {
        let record = FeatureRecord::new(GeometryRecord::Point { position });
        FeatureNode::from_record(FeatureId(id), &record, 1e-4).expect("Punkt")
    }

    fn sample_features() -> Vec<FeatureNode> {
        vec![
            point(1, Vec3::new(0.0, 0.0, 0.0)),
            point(2, Vec3::new(10.0, 0.0, 0.0)),
            point(3, Vec3::new(4.0, 3.0, 0.0)),
        ]
    }

    #[test]
    fn nearest_returns_expected_feature() {
        let index = SpatialIndex::from_features(&sample_features());
        let nearest = index
            .nearest(Vec3::new(3.9, 2.9, 0.0), &HashSet::new())
            .expect("Treffer erwartet");

        assert_eq!(nearest.feature_id, FeatureId(3));
        assert!(nearest.distance < 0.2);
    }

    #[test]
    fn nearest_skips_excluded_features() {
        let index = SpatialIndex::from_features(&sample_features());
        let exclude: HashSet<FeatureId> = [FeatureId(3)].into_iter().collect();

        let nearest = index
            .nearest(Vec3::new(3.9, 2.9, 0.0), &exclude)
            .expect("Treffer erwartet");

        assert_eq!(nearest.feature_id, FeatureId(1));
    }

    #[test]
    fn radius_query_returns_sorted_matches() {
        let index = SpatialIndex::from_features(&sample_features());
        let matches = index.within_radius(Vec3::ZERO, 6.0);

        let ids: Vec<FeatureId> = matches.into_iter().map(|m| m.feature_id).collect();
        assert_eq!(ids, vec![FeatureId(1), FeatureId(3)]);
    }

    #[test]
    fn empty_index_has_no_entries() {
        let index = SpatialIndex::empty();

        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert!(index.nearest(Vec3::ZERO, &HashSet::new()).is_none());
    }
}
