//! Geometrie-Varianten eines Features und ihre serialisierbare Form.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::vertex_line::{LineVertex, VertexLineGraph};
use super::{EditError, EditResult, IdAllocator, VertexId};

/// Welche Art neuer Features ein Layer annimmt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureShape {
    /// Container-Layer ohne eigene Geometrie
    #[default]
    None,
    /// Einzelpunkte
    Point,
    /// Offene Polylinien
    Line,
    /// Polygone mit optionalen Löchern
    Polygon,
    /// Vorberechnete Dreiecksnetze
    Mesh,
}

/// Serialisierbare Geometrie (Austausch mit Loadern und Replikas).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometryRecord {
    /// Einzelner Punkt
    Point { position: Vec3 },
    /// Offene Polylinie
    LineString { positions: Vec<Vec3> },
    /// Ring + Löcher; Ringe dürfen den Startpunkt am Ende wiederholen
    Polygon {
        ring: Vec<Vec3>,
        #[serde(default)]
        holes: Vec<Vec<Vec3>>,
    },
    /// Dreiecksnetz
    Mesh { vertices: Vec<Vec3>, indices: Vec<u32> },
}

impl GeometryRecord {
    /// Zugehörige Feature-Form.
    pub fn shape(&self) -> FeatureShape {
        match self {
            Self::Point { .. } => FeatureShape::Point,
            Self::LineString { .. } => FeatureShape::Line,
            Self::Polygon { .. } => FeatureShape::Polygon,
            Self::Mesh { .. } => FeatureShape::Mesh,
        }
    }
}

/// Dreiecksnetz; wird nur als Ganzes bewegt, nicht vertex-editiert.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshPayload {
    /// Vertex-Positionen
    pub vertices: Vec<Vec3>,
    /// Dreiecks-Indizes (3 pro Dreieck)
    pub indices: Vec<u32>,
}

/// Aus der Geometrie abgeleitete Werte, die nach jeder Änderung neu berechnet werden.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DerivedGeometry {
    /// Schwerpunkt der Vertex-Positionen (Anker für `MoveTo`)
    pub centroid: Vec3,
    /// Minimum der Bounding-Box
    pub min: Vec3,
    /// Maximum der Bounding-Box
    pub max: Vec3,
}

impl DerivedGeometry {
    /// Berechnet Schwerpunkt und Bounds aus einer Positionsmenge.
    pub fn from_positions(positions: impl IntoIterator<Item = Vec3>) -> Self {
        let mut count = 0usize;
        let mut sum = Vec3::ZERO;
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in positions {
            count += 1;
            sum += p;
            min = min.min(p);
            max = max.max(p);
        }
        if count == 0 {
            return Self::default();
        }
        Self {
            centroid: sum / count as f32,
            min,
            max,
        }
    }
}

/// Geometrie eines Features als getaggte Variante.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    /// Punkt; der Vertex ist zugleich sein Handle
    Point(LineVertex),
    /// Offene Polylinie
    Polyline(VertexLineGraph),
    /// Polygon aus Außenring und Löchern
    Polygon {
        ring: VertexLineGraph,
        holes: Vec<VertexLineGraph>,
    },
    /// Dreiecksnetz
    Mesh(MeshPayload),
}

impl FeatureGeometry {
    /// Baut die Geometrie aus einem Record; Vertex-IDs kommen aus `ids`.
    ///
    /// Polygon-Ringe werden mit `epsilon` geschlossen, ein wiederholter
    /// Startpunkt am Ringende wird dabei verworfen.
    pub fn from_record(
        record: &GeometryRecord,
        ids: &mut IdAllocator,
        epsilon: f32,
    ) -> EditResult<Self> {
        match record {
            GeometryRecord::Point { position } => Ok(Self::Point(LineVertex::new(
                VertexId(ids.allocate()),
                *position,
            ))),
            GeometryRecord::LineString { positions } => {
                Ok(Self::Polyline(VertexLineGraph::open(to_vertices(positions, ids))?))
            }
            GeometryRecord::Polygon { ring, holes } => {
                let ring = VertexLineGraph::ring(to_vertices(ring, ids), epsilon)?;
                let holes = holes
                    .iter()
                    .map(|hole| VertexLineGraph::ring(to_vertices(hole, ids), epsilon))
                    .collect::<EditResult<Vec<_>>>()?;
                Ok(Self::Polygon { ring, holes })
            }
            GeometryRecord::Mesh { vertices, indices } => {
                if indices.len() % 3 != 0 {
                    return Err(EditError::topology(format!(
                        "Mesh-Indexanzahl {} ist kein Vielfaches von 3",
                        indices.len()
                    )));
                }
                if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
                    return Err(EditError::topology(format!(
                        "Mesh-Index {bad} ausserhalb von {} Vertices",
                        vertices.len()
                    )));
                }
                Ok(Self::Mesh(MeshPayload {
                    vertices: vertices.clone(),
                    indices: indices.clone(),
                }))
            }
        }
    }

    /// Serialisierbare Form; Ringe wiederholen den Startpunkt am Ende.
    pub fn to_record(&self) -> GeometryRecord {
        fn closed_positions(graph: &VertexLineGraph) -> Vec<Vec3> {
            let mut positions = graph.positions();
            if let Some(first) = positions.first().copied() {
                positions.push(first);
            }
            positions
        }

        match self {
            Self::Point(vertex) => GeometryRecord::Point {
                position: vertex.position,
            },
            Self::Polyline(graph) => GeometryRecord::LineString {
                positions: graph.positions(),
            },
            Self::Polygon { ring, holes } => GeometryRecord::Polygon {
                ring: closed_positions(ring),
                holes: holes.iter().map(closed_positions).collect(),
            },
            Self::Mesh(mesh) => GeometryRecord::Mesh {
                vertices: mesh.vertices.clone(),
                indices: mesh.indices.clone(),
            },
        }
    }

    /// Zugehörige Feature-Form.
    pub fn shape(&self) -> FeatureShape {
        match self {
            Self::Point(_) => FeatureShape::Point,
            Self::Polyline(_) => FeatureShape::Line,
            Self::Polygon { .. } => FeatureShape::Polygon,
            Self::Mesh(_) => FeatureShape::Mesh,
        }
    }

    /// Gesamtzahl der Vertices (inkl. Löcher).
    pub fn vertex_count(&self) -> usize {
        match self {
            Self::Point(_) => 1,
            Self::Polyline(graph) => graph.len(),
            Self::Polygon { ring, holes } => {
                ring.len() + holes.iter().map(VertexLineGraph::len).sum::<usize>()
            }
            Self::Mesh(mesh) => mesh.vertices.len(),
        }
    }

    /// Alle editierbaren Vertices (Mesh-Vertices haben keine Handles).
    pub fn handles(&self) -> Vec<LineVertex> {
        match self {
            Self::Point(vertex) => vec![*vertex],
            Self::Polyline(graph) => graph.vertices().to_vec(),
            Self::Polygon { ring, holes } => ring
                .vertices()
                .iter()
                .chain(holes.iter().flat_map(|h| h.vertices().iter()))
                .copied()
                .collect(),
            Self::Mesh(_) => Vec::new(),
        }
    }

    /// Alle Positionen (für Bounds und Schwerpunkt).
    pub fn positions(&self) -> Vec<Vec3> {
        match self {
            Self::Mesh(mesh) => mesh.vertices.clone(),
            other => other.handles().into_iter().map(|v| v.position).collect(),
        }
    }

    /// Wendet eine Positions-Abbildung auf jede Position an.
    pub fn transform_positions(&mut self, f: impl Fn(Vec3) -> Vec3) {
        match self {
            Self::Point(vertex) => vertex.position = f(vertex.position),
            Self::Polyline(graph) => graph.transform_positions(&f),
            Self::Polygon { ring, holes } => {
                ring.transform_positions(&f);
                for hole in holes {
                    hole.transform_positions(&f);
                }
            }
            Self::Mesh(mesh) => {
                for p in &mut mesh.vertices {
                    *p = f(*p);
                }
            }
        }
    }

    /// Höchste vergebene Vertex-ID (für den Allocator nach dem Laden).
    pub fn max_vertex_id(&self) -> Option<VertexId> {
        self.handles().iter().map(|v| v.id).max()
    }
}

fn to_vertices(positions: &[Vec3], ids: &mut IdAllocator) -> Vec<LineVertex> {
    positions
        .iter()
        .map(|p| LineVertex::new(VertexId(ids.allocate()), *p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_record_roundtrip_drops_closing_duplicate() {
        let record = GeometryRecord::Polygon {
            ring: vec![Vec3::ZERO, Vec3::X, Vec3::Z, Vec3::ZERO],
            holes: Vec::new(),
        };
        let mut ids = IdAllocator::starting_at(1);

        let geometry = FeatureGeometry::from_record(&record, &mut ids, 1e-4).expect("Polygon");

        assert_eq!(geometry.vertex_count(), 3);
        assert_eq!(geometry.to_record(), record);
    }

    #[test]
    fn mesh_rejects_out_of_range_indices() {
        let record = GeometryRecord::Mesh {
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            indices: vec![0, 1, 3],
        };
        let mut ids = IdAllocator::starting_at(1);

        assert!(FeatureGeometry::from_record(&record, &mut ids, 1e-4).is_err());
    }

    #[test]
    fn derived_geometry_of_square() {
        let derived = DerivedGeometry::from_positions([
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 2.0),
            Vec3::new(0.0, 0.0, 2.0),
        ]);

        assert_eq!(derived.centroid, Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(derived.min, Vec3::ZERO);
        assert_eq!(derived.max, Vec3::new(2.0, 0.0, 2.0));
    }

    #[test]
    fn record_json_is_tagged() {
        let json = serde_json::to_string(&GeometryRecord::Point {
            position: Vec3::new(1.0, 2.0, 3.0),
        })
        .expect("serialisierbar");

        assert_eq!(json, r#"{"type":"point","position":[1.0,2.0,3.0]}"#);
    }
}
