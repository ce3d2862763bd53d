//! Ein editierbares Feature (Punkt, Linie, Polygon, Mesh) eines Layers.

use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::geometry::{DerivedGeometry, FeatureGeometry, GeometryRecord};
use super::vertex_line::{LineSegment, LineVertex, VertexLineGraph};
use super::{EditError, EditResult, FeatureId, IdAllocator, VertexId};

/// Serialisierbare Form eines Features (Loader-Austausch und Replikation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Persistierte ID; `None` bei neu importierten Features
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FeatureId>,
    /// Geometrie
    pub geometry: GeometryRecord,
    /// Index in die Symbologie-Palette des Layers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<usize>,
    /// Freie Attribute aus der Quelle
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl FeatureRecord {
    /// Erstellt einen Record ohne ID, Stil und Attribute.
    pub fn new(geometry: GeometryRecord) -> Self {
        Self {
            id: None,
            geometry,
            style: None,
            properties: BTreeMap::new(),
        }
    }
}

/// Welcher Teil eines Features bewegt werden soll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeaturePart {
    /// Das ganze Feature
    Whole,
    /// Ein einzelner Vertex-Handle
    Vertex(VertexId),
}

/// Geometrische Transformation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveOp {
    /// Verschiebung um ein Delta
    Translate(Vec3),
    /// Rotation und uniforme Skalierung um einen Pivot
    MoveAxis {
        pivot: Vec3,
        rotation: Quat,
        scale: f32,
    },
    /// Anker (Schwerpunkt bzw. Vertex) an Zielposition setzen
    MoveTo(Vec3),
}

impl MoveOp {
    /// Abbildung eines Punktes; `anchor` ist der Bezugspunkt für `MoveTo`.
    pub fn map_point(&self, p: Vec3, anchor: Vec3) -> Vec3 {
        match *self {
            Self::Translate(delta) => p + delta,
            Self::MoveAxis {
                pivot,
                rotation,
                scale,
            } => pivot + rotation * ((p - pivot) * scale),
            Self::MoveTo(target) => p + (target - anchor),
        }
    }
}

/// Ergebnis einer Move-Anfrage an ein Feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveOutcome {
    /// Lokal angewendet
    Absorbed,
    /// Nicht im Block-Move: an den selektionsbewussten Handler des Layers weiterreichen
    Forward(MoveOp),
}

/// Sicht auf einen Vertex-Handle (Sub-Feature eines Features).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexHandle {
    /// Besitzendes Feature
    pub feature: FeatureId,
    /// Stabile Vertex-ID
    pub vertex: VertexId,
    /// Aktueller Index im Linien-Graph
    pub index: usize,
    /// Position
    pub position: Vec3,
}

/// Was beim Entfernen eines Vertex tatsächlich entfernt wurde.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VertexRemoval {
    /// Nur der Vertex
    Vertex(LineVertex),
    /// Das Loch wäre degeneriert und wurde vollständig entfernt
    Hole(usize),
}

/// Ein editierbares geometrisches Objekt, exklusiv im Besitz seines Layers.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureNode {
    id: FeatureId,
    geometry: FeatureGeometry,
    style: Option<usize>,
    properties: BTreeMap<String, String>,
    block_move: bool,
    derived: DerivedGeometry,
    vertex_ids: IdAllocator,
}

impl FeatureNode {
    /// Erstellt ein Feature aus einer bereits gebauten Geometrie.
    pub fn new(id: FeatureId, geometry: FeatureGeometry) -> Self {
        let mut vertex_ids = IdAllocator::starting_at(1);
        if let Some(max) = geometry.max_vertex_id() {
            vertex_ids.reserve(max.get());
        }
        let derived = DerivedGeometry::from_positions(geometry.positions());
        Self {
            id,
            geometry,
            style: None,
            properties: BTreeMap::new(),
            block_move: false,
            derived,
            vertex_ids,
        }
    }

    /// Baut ein Feature aus einem Record (Polygon-Ringe werden mit `epsilon` geschlossen).
    pub fn from_record(id: FeatureId, record: &FeatureRecord, epsilon: f32) -> EditResult<Self> {
        let mut ids = IdAllocator::starting_at(1);
        let geometry = FeatureGeometry::from_record(&record.geometry, &mut ids, epsilon)?;
        let mut feature = Self::new(id, geometry);
        feature.style = record.style;
        feature.properties = record.properties.clone();
        Ok(feature)
    }

    /// Serialisierbare Form inkl. ID.
    pub fn to_record(&self) -> FeatureRecord {
        FeatureRecord {
            id: Some(self.id),
            geometry: self.geometry.to_record(),
            style: self.style,
            properties: self.properties.clone(),
        }
    }

    /// Feature-ID.
    pub fn id(&self) -> FeatureId {
        self.id
    }

    /// Aktuelle Geometrie.
    pub fn geometry(&self) -> &FeatureGeometry {
        &self.geometry
    }

    /// Abgeleitete Werte (Schwerpunkt, Bounds).
    pub fn derived(&self) -> &DerivedGeometry {
        &self.derived
    }

    /// Palettenindex der Symbologie.
    pub fn style(&self) -> Option<usize> {
        self.style
    }

    /// Setzt den Palettenindex.
    pub fn set_style(&mut self, style: Option<usize>) {
        self.style = style;
    }

    /// Freie Attribute.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// `true`, wenn das Feature selbst Selektionswurzel ist und Moves lokal übernimmt.
    pub fn block_move(&self) -> bool {
        self.block_move
    }

    /// Setzt den Block-Move-Zustand.
    pub fn set_block_move(&mut self, block_move: bool) {
        self.block_move = block_move;
    }

    /// Alle Vertex-Handles des Features.
    pub fn handles(&self) -> Vec<VertexHandle> {
        let to_handles = |graph: &VertexLineGraph| {
            graph
                .vertices()
                .iter()
                .enumerate()
                .map(|(index, v)| VertexHandle {
                    feature: self.id,
                    vertex: v.id,
                    index,
                    position: v.position,
                })
                .collect::<Vec<_>>()
        };

        match &self.geometry {
            FeatureGeometry::Point(v) => vec![VertexHandle {
                feature: self.id,
                vertex: v.id,
                index: 0,
                position: v.position,
            }],
            FeatureGeometry::Polyline(graph) => to_handles(graph),
            FeatureGeometry::Polygon { ring, holes } => {
                let mut handles = to_handles(ring);
                for hole in holes {
                    handles.extend(to_handles(hole));
                }
                handles
            }
            FeatureGeometry::Mesh(_) => Vec::new(),
        }
    }

    /// Sucht einen Vertex-Handle.
    pub fn handle(&self, vertex: VertexId) -> Option<VertexHandle> {
        self.handles().into_iter().find(|h| h.vertex == vertex)
    }

    /// Fügt einen Vertex auf dem nächstgelegenen Segment ein.
    ///
    /// Sucht über alle Segmente (bei Polygonen inkl. Löcher) den nächsten Punkt,
    /// teilt das Segment und liefert den neuen Handle. Punkte und Meshes
    /// haben keine Segmente und lehnen mit `InvalidTopology` ab.
    pub fn add_vertex(&mut self, position: Vec3) -> EditResult<VertexHandle> {
        // ID erst nach erfolgreichem Einfuegen verbrauchen
        let vertex = LineVertex::new(VertexId(self.vertex_ids.peek()), position);

        let index = match &mut self.geometry {
            FeatureGeometry::Polyline(graph) => {
                let hit = graph
                    .nearest_segment(position)
                    .ok_or_else(|| EditError::topology("Linie ohne Segmente"))?;
                graph.insert_vertex(hit.segment, vertex)?
            }
            FeatureGeometry::Polygon { ring, holes } => {
                let mut target: Option<(&mut VertexLineGraph, LineSegment, f32)> = None;
                for graph in std::iter::once(ring).chain(holes.iter_mut()) {
                    let Some(hit) = graph.nearest_segment(position) else {
                        continue;
                    };
                    let closer = match &target {
                        Some((_, _, distance)) => hit.distance < *distance,
                        None => true,
                    };
                    if closer {
                        target = Some((graph, hit.segment, hit.distance));
                    }
                }
                let (graph, segment, _) =
                    target.ok_or_else(|| EditError::topology("Polygon ohne Segmente"))?;
                graph.insert_vertex(segment, vertex)?
            }
            FeatureGeometry::Point(_) => {
                return Err(EditError::topology("Punkt-Features haben keine Segmente"))
            }
            FeatureGeometry::Mesh(_) => {
                return Err(EditError::topology("Mesh-Features sind nicht vertex-editierbar"))
            }
        };

        self.vertex_ids.allocate();
        self.rederive();
        Ok(VertexHandle {
            feature: self.id,
            vertex: vertex.id,
            index,
            position,
        })
    }

    /// Entfernt einen Vertex-Handle.
    ///
    /// Unterschreitet die Linie bzw. der Außenring das Minimum, kommt
    /// `DegenerateGeometry` zurück und das Feature bleibt unverändert; ein
    /// degeneriertes Loch wird stattdessen vollständig entfernt.
    pub fn remove_vertex(&mut self, vertex: VertexId) -> EditResult<VertexRemoval> {
        let unknown = EditError::UnknownVertex {
            feature: self.id,
            vertex,
        };

        let removal = match &mut self.geometry {
            FeatureGeometry::Point(v) => {
                if v.id != vertex {
                    return Err(unknown);
                }
                return Err(EditError::DegenerateGeometry {
                    remaining: 0,
                    minimum: 1,
                });
            }
            FeatureGeometry::Polyline(graph) => {
                let index = graph.vertex_index(vertex).ok_or(unknown)?;
                VertexRemoval::Vertex(graph.remove_vertex(index)?)
            }
            FeatureGeometry::Polygon { ring, holes } => {
                if let Some(index) = ring.vertex_index(vertex) {
                    VertexRemoval::Vertex(ring.remove_vertex(index)?)
                } else {
                    let (hole_index, index) = holes
                        .iter()
                        .enumerate()
                        .find_map(|(h, hole)| hole.vertex_index(vertex).map(|i| (h, i)))
                        .ok_or(unknown)?;
                    match holes[hole_index].remove_vertex(index) {
                        Ok(removed) => VertexRemoval::Vertex(removed),
                        Err(EditError::DegenerateGeometry { .. }) => {
                            holes.remove(hole_index);
                            VertexRemoval::Hole(hole_index)
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
            FeatureGeometry::Mesh(_) => {
                return Err(EditError::topology("Mesh-Features sind nicht vertex-editierbar"))
            }
        };

        self.rederive();
        Ok(removal)
    }

    /// Wendet eine Transformation an.
    ///
    /// `Whole` wird nur im Block-Move lokal übernommen, sonst an den Layer
    /// weitergereicht. Ein Vertex-Handle gehört zum Feature und wird immer hier bewegt.
    pub fn apply_move(&mut self, part: FeaturePart, op: MoveOp) -> EditResult<MoveOutcome> {
        match part {
            FeaturePart::Whole => {
                if !self.block_move {
                    return Ok(MoveOutcome::Forward(op));
                }
                self.move_whole(op);
                Ok(MoveOutcome::Absorbed)
            }
            FeaturePart::Vertex(vertex) => {
                self.move_vertex(vertex, op)?;
                Ok(MoveOutcome::Absorbed)
            }
        }
    }

    /// Bewegt das ganze Feature unabhängig vom Block-Move-Zustand.
    pub fn move_whole(&mut self, op: MoveOp) {
        let anchor = self.derived.centroid;
        self.geometry
            .transform_positions(|p| op.map_point(p, anchor));
        self.rederive();
    }

    fn move_vertex(&mut self, vertex: VertexId, op: MoveOp) -> EditResult<()> {
        let unknown = EditError::UnknownVertex {
            feature: self.id,
            vertex,
        };

        let move_in = |graph: &mut VertexLineGraph| -> Option<EditResult<()>> {
            let index = graph.vertex_index(vertex)?;
            let current = graph.vertex(index)?.position;
            Some(graph.move_vertex(index, op.map_point(current, current)))
        };

        match &mut self.geometry {
            FeatureGeometry::Point(v) if v.id == vertex => {
                v.position = op.map_point(v.position, v.position);
            }
            FeatureGeometry::Polyline(graph) => move_in(graph).ok_or(unknown)??,
            FeatureGeometry::Polygon { ring, holes } => std::iter::once(ring)
                .chain(holes.iter_mut())
                .find_map(move_in)
                .ok_or(unknown)??,
            _ => return Err(unknown),
        }

        self.rederive();
        Ok(())
    }

    fn rederive(&mut self) {
        self.derived = DerivedGeometry::from_positions(self.geometry.positions());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line_feature() -> FeatureNode {
        let record = FeatureRecord::new(GeometryRecord::LineString {
            positions: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(10.0, 0.0, 0.0),
                Vec3::new(20.0, 0.0, 0.0),
            ],
        });
        FeatureNode::from_record(FeatureId(1), &record, 1e-4).expect("Linie")
    }

    fn square_with_hole() -> FeatureNode {
        let record = FeatureRecord::new(GeometryRecord::Polygon {
            ring: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(10.0, 0.0, 0.0),
                Vec3::new(10.0, 0.0, 10.0),
                Vec3::new(0.0, 0.0, 10.0),
            ],
            holes: vec![vec![
                Vec3::new(4.0, 0.0, 4.0),
                Vec3::new(6.0, 0.0, 4.0),
                Vec3::new(5.0, 0.0, 6.0),
            ]],
        });
        FeatureNode::from_record(FeatureId(2), &record, 1e-4).expect("Polygon")
    }

    #[test]
    fn add_vertex_splits_nearest_segment() {
        let mut feature = line_feature();

        let handle = feature
            .add_vertex(Vec3::new(15.0, 0.0, 1.0))
            .expect("Vertex erwartet");

        assert_eq!(handle.index, 2);
        assert_eq!(feature.geometry().vertex_count(), 4);
        // neue Vertex-ID kollidiert nicht mit den geladenen
        assert_eq!(handle.vertex, VertexId(4));
    }

    #[test]
    fn add_vertex_on_polygon_prefers_nearest_hole_segment() {
        let mut feature = square_with_hole();

        feature
            .add_vertex(Vec3::new(5.0, 0.0, 3.9))
            .expect("Vertex erwartet");

        let FeatureGeometry::Polygon { ring, holes } = feature.geometry() else {
            panic!("Polygon erwartet");
        };
        assert_eq!(ring.len(), 4);
        assert_eq!(holes[0].len(), 4);
    }

    #[test]
    fn remove_hole_vertex_below_minimum_drops_hole() {
        let mut feature = square_with_hole();
        let hole_vertex = feature.handles()[4].vertex;

        let removal = feature.remove_vertex(hole_vertex).expect("Entfernen");

        assert_eq!(removal, VertexRemoval::Hole(0));
        let FeatureGeometry::Polygon { holes, .. } = feature.geometry() else {
            panic!("Polygon erwartet");
        };
        assert!(holes.is_empty());
    }

    #[test]
    fn point_cannot_add_or_remove_vertices() {
        let record = FeatureRecord::new(GeometryRecord::Point {
            position: Vec3::ONE,
        });
        let mut point = FeatureNode::from_record(FeatureId(3), &record, 1e-4).expect("Punkt");
        let vertex = point.handles()[0].vertex;

        assert!(matches!(
            point.add_vertex(Vec3::ZERO),
            Err(EditError::InvalidTopology(_))
        ));
        assert!(matches!(
            point.remove_vertex(vertex),
            Err(EditError::DegenerateGeometry { minimum: 1, .. })
        ));
    }

    #[test]
    fn whole_move_is_forwarded_unless_block_move() {
        let mut feature = line_feature();
        let op = MoveOp::Translate(Vec3::Y);

        assert_eq!(
            feature.apply_move(FeaturePart::Whole, op),
            Ok(MoveOutcome::Forward(op))
        );
        assert_relative_eq!(feature.derived().centroid.y, 0.0);

        feature.set_block_move(true);
        assert_eq!(
            feature.apply_move(FeaturePart::Whole, op),
            Ok(MoveOutcome::Absorbed)
        );
        assert_relative_eq!(feature.derived().centroid.y, 1.0);
    }

    #[test]
    fn move_to_places_centroid() {
        let mut feature = line_feature();
        feature.move_whole(MoveOp::MoveTo(Vec3::new(0.0, 5.0, 0.0)));

        let centroid = feature.derived().centroid;
        assert_relative_eq!(centroid.x, 0.0);
        assert_relative_eq!(centroid.y, 5.0);
    }

    #[test]
    fn vertex_move_is_absorbed_locally() {
        let mut feature = line_feature();
        let handle = feature.handles()[1];

        let outcome = feature
            .apply_move(
                FeaturePart::Vertex(handle.vertex),
                MoveOp::MoveTo(Vec3::new(10.0, 3.0, 0.0)),
            )
            .expect("Move erwartet");

        assert_eq!(outcome, MoveOutcome::Absorbed);
        assert_eq!(
            feature.handle(handle.vertex).map(|h| h.position),
            Some(Vec3::new(10.0, 3.0, 0.0))
        );
    }

    #[test]
    fn move_axis_rotates_about_pivot() {
        let mut feature = line_feature();
        feature.move_whole(MoveOp::MoveAxis {
            pivot: Vec3::ZERO,
            rotation: Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            scale: 1.0,
        });

        let end = feature.handles()[2].position;
        assert_relative_eq!(end.x, 0.0, epsilon = 1e-4);
        assert_relative_eq!(end.z, -20.0, epsilon = 1e-4);
    }
}
