//! Index- und Adjazenz-Verwaltung für eine einzelne Polylinie oder einen Ring.
//!
//! Ein `VertexLineGraph` hält die geordneten Vertices und für jedes benachbarte
//! Paar einen Segment-Record `(start → end)`. Bei geschlossenen Ringen existiert
//! zusätzlich das Wrap-Segment `(n-1 → 0)`.
//!
//! Invariante nach jeder Operation:
//! - jeder Index `v` hat genau ein ausgehendes Segment, außer `v == n-1` bei offenen Linien
//! - jeder Index `v` hat genau ein eingehendes Segment, außer `v == 0` bei offenen Linien
//!
//! Alle Mutationen sind atomar: schlägt eine Vorbedingung fehl, bleibt der Graph unverändert.

use glam::Vec3;

use super::{EditError, EditResult, VertexId};

/// Minimale Vertexanzahl einer offenen Polylinie.
pub const OPEN_MIN_VERTICES: usize = 2;
/// Minimale Vertexanzahl eines geschlossenen Rings.
pub const RING_MIN_VERTICES: usize = 3;

/// Ein Vertex mit stabiler Handle-ID.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineVertex {
    /// Stabile ID (überlebt Index-Umnummerierungen)
    pub id: VertexId,
    /// Position in Weltkoordinaten
    pub position: Vec3,
}

impl LineVertex {
    /// Erstellt einen neuen Vertex.
    pub fn new(id: VertexId, position: Vec3) -> Self {
        Self { id, position }
    }
}

/// Segment-Record zwischen zwei Vertex-Indizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineSegment {
    /// Start-Index
    pub start: usize,
    /// End-Index
    pub end: usize,
}

impl LineSegment {
    /// Erstellt einen Segment-Record.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Ergebnis der Nächstes-Segment-Suche.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentHit {
    /// Getroffenes Segment
    pub segment: LineSegment,
    /// Nächster Punkt auf dem Segment
    pub point: Vec3,
    /// Euklidische Distanz zum Suchpunkt
    pub distance: f32,
}

/// Geordnete Vertex-Kette mit Segment-Adjazenz.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexLineGraph {
    vertices: Vec<LineVertex>,
    /// Sortiert nach `start`, damit Iteration deterministisch bleibt
    segments: Vec<LineSegment>,
    closed: bool,
}

impl VertexLineGraph {
    /// Erstellt eine offene Kette `(0→1), (1→2), …`.
    pub fn open(vertices: Vec<LineVertex>) -> EditResult<Self> {
        if vertices.len() < OPEN_MIN_VERTICES {
            return Err(EditError::DegenerateGeometry {
                remaining: vertices.len(),
                minimum: OPEN_MIN_VERTICES,
            });
        }

        let segments = (0..vertices.len() - 1)
            .map(|i| LineSegment::new(i, i + 1))
            .collect();

        Ok(Self {
            vertices,
            segments,
            closed: false,
        })
    }

    /// Erstellt einen geschlossenen Ring (inkl. Duplikat-Bereinigung, siehe [`Self::close`]).
    pub fn ring(vertices: Vec<LineVertex>, epsilon: f32) -> EditResult<Self> {
        let mut graph = Self::open(vertices)?;
        graph.close(epsilon)?;
        Ok(graph)
    }

    /// Anzahl der Vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// `true`, wenn keine Vertices vorhanden sind (kann nach Konstruktion nicht auftreten).
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// `true` für Polygon-Ringe.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mindestanzahl an Vertices für diesen Graph-Typ.
    pub fn minimum_vertices(&self) -> usize {
        if self.closed {
            RING_MIN_VERTICES
        } else {
            OPEN_MIN_VERTICES
        }
    }

    /// Alle Vertices in Index-Reihenfolge.
    pub fn vertices(&self) -> &[LineVertex] {
        &self.vertices
    }

    /// Alle Segment-Records, sortiert nach Start-Index.
    pub fn segments(&self) -> &[LineSegment] {
        &self.segments
    }

    /// Positionen in Index-Reihenfolge.
    pub fn positions(&self) -> Vec<Vec3> {
        self.vertices.iter().map(|v| v.position).collect()
    }

    /// Vertex am Index.
    pub fn vertex(&self, index: usize) -> Option<&LineVertex> {
        self.vertices.get(index)
    }

    /// Sucht den aktuellen Index einer stabilen Vertex-ID.
    pub fn vertex_index(&self, id: VertexId) -> Option<usize> {
        self.vertices.iter().position(|v| v.id == id)
    }

    /// Ausgehendes Segment eines Index.
    pub fn outgoing(&self, index: usize) -> Option<LineSegment> {
        self.segments.iter().copied().find(|s| s.start == index)
    }

    /// Eingehendes Segment eines Index.
    pub fn incoming(&self, index: usize) -> Option<LineSegment> {
        self.segments.iter().copied().find(|s| s.end == index)
    }

    /// Teilt `after` in zwei Segmente und fügt `vertex` dazwischen ein.
    ///
    /// Alle Indizes `> start` werden um 1 erhöht, der neue Vertex erhält `start + 1`.
    /// Das ursprüngliche Segment wird auf `(start → start+1)` verkürzt, das neue
    /// Segment zeigt auf das (umnummerierte) alte Ende bzw. auf `0` beim Wrap-Segment.
    pub fn insert_vertex(&mut self, after: LineSegment, vertex: LineVertex) -> EditResult<usize> {
        let n = self.vertices.len();
        if after.start >= n || after.end >= n {
            return Err(EditError::topology(format!(
                "Segment ({} -> {}) liegt ausserhalb von {} Vertices",
                after.start, after.end, n
            )));
        }
        let Some(slot) = self.segments.iter().position(|s| *s == after) else {
            return Err(EditError::topology(format!(
                "Vertices {} und {} sind nicht benachbart",
                after.start, after.end
            )));
        };

        let s = after.start;
        for segment in &mut self.segments {
            if segment.start > s {
                segment.start += 1;
            }
            if segment.end > s {
                segment.end += 1;
            }
        }

        let new_index = s + 1;
        self.vertices.insert(new_index, vertex);

        let shifted_end = self.segments[slot].end;
        self.segments[slot].end = new_index;
        self.segments.push(LineSegment::new(new_index, shifted_end));
        self.segments.sort_unstable_by_key(|seg| seg.start);

        debug_assert!(self.validate().is_ok());
        Ok(new_index)
    }

    /// Entfernt den Vertex am Index und verbindet Vorgänger und Nachfolger direkt.
    ///
    /// Liefert `DegenerateGeometry`, wenn die Mindestanzahl unterschritten würde;
    /// der Aufrufer muss dann das besitzende Feature löschen.
    pub fn remove_vertex(&mut self, index: usize) -> EditResult<LineVertex> {
        let n = self.vertices.len();
        if index >= n {
            return Err(EditError::topology(format!(
                "Vertex-Index {index} ausserhalb von {n} Vertices"
            )));
        }
        let minimum = self.minimum_vertices();
        if n - 1 < minimum {
            return Err(EditError::DegenerateGeometry {
                remaining: n - 1,
                minimum,
            });
        }

        let incoming = self.segments.iter().position(|s| s.end == index);
        let outgoing = self.segments.iter().position(|s| s.start == index);

        match (incoming, outgoing) {
            (Some(inc), Some(out)) => {
                // (p → index) + (index → q) kollabieren zu (p → q)
                self.segments[inc].end = self.segments[out].end;
                self.segments.remove(out);
            }
            (Some(inc), None) => {
                self.segments.remove(inc);
            }
            (None, Some(out)) => {
                self.segments.remove(out);
            }
            (None, None) => {
                return Err(EditError::topology(format!(
                    "Vertex {index} hat keine Segmente"
                )));
            }
        }

        let removed = self.vertices.remove(index);
        for segment in &mut self.segments {
            if segment.start > index {
                segment.start -= 1;
            }
            if segment.end > index {
                segment.end -= 1;
            }
        }
        self.segments.sort_unstable_by_key(|seg| seg.start);

        debug_assert!(self.validate().is_ok());
        Ok(removed)
    }

    /// Schließt die Kette zu einem Ring.
    ///
    /// Liegt der letzte Vertex innerhalb von `epsilon` auf dem ersten, wird er
    /// entfernt und das vorherige Segment auf `0` umgebogen, statt einen doppelten
    /// kollokierten Vertex zu behalten. Gibt den verworfenen Vertex zurück.
    pub fn close(&mut self, epsilon: f32) -> EditResult<Option<LineVertex>> {
        if self.closed {
            return Ok(None);
        }

        let n = self.vertices.len();
        let first = self.vertices[0].position;
        let last = self.vertices[n - 1].position;

        if last.distance(first) <= epsilon {
            if n - 1 < RING_MIN_VERTICES {
                return Err(EditError::DegenerateGeometry {
                    remaining: n - 1,
                    minimum: RING_MIN_VERTICES,
                });
            }
            let Some(prior) = self.segments.iter_mut().find(|s| s.end == n - 1) else {
                return Err(EditError::topology("letzter Vertex ohne eingehendes Segment"));
            };
            prior.end = 0;
            let dropped = self.vertices.pop();
            self.closed = true;
            debug_assert!(self.validate().is_ok());
            return Ok(dropped);
        }

        if n < RING_MIN_VERTICES {
            return Err(EditError::DegenerateGeometry {
                remaining: n,
                minimum: RING_MIN_VERTICES,
            });
        }

        self.segments.push(LineSegment::new(n - 1, 0));
        self.closed = true;
        debug_assert!(self.validate().is_ok());
        Ok(None)
    }

    /// Findet das Segment mit dem kleinsten Abstand zu `position`.
    pub fn nearest_segment(&self, position: Vec3) -> Option<SegmentHit> {
        let mut best: Option<SegmentHit> = None;
        for segment in &self.segments {
            let a = self.vertices[segment.start].position;
            let b = self.vertices[segment.end].position;
            let point = closest_point_on_segment(position, a, b);
            let distance = point.distance(position);
            match best {
                Some(hit) if hit.distance <= distance => {}
                _ => {
                    best = Some(SegmentHit {
                        segment: *segment,
                        point,
                        distance,
                    })
                }
            }
        }
        best
    }

    /// Setzt die Position eines Vertex (Topologie bleibt unverändert).
    pub fn move_vertex(&mut self, index: usize, position: Vec3) -> EditResult<()> {
        let Some(vertex) = self.vertices.get_mut(index) else {
            return Err(EditError::topology(format!(
                "Vertex-Index {index} ausserhalb der Linie"
            )));
        };
        vertex.position = position;
        Ok(())
    }

    /// Wendet eine Positions-Abbildung auf alle Vertices an.
    pub fn transform_positions(&mut self, f: impl Fn(Vec3) -> Vec3) {
        for vertex in &mut self.vertices {
            vertex.position = f(vertex.position);
        }
    }

    /// Prüft die Adjazenz-Invariante.
    pub fn validate(&self) -> EditResult<()> {
        let n = self.vertices.len();
        if n < self.minimum_vertices() {
            return Err(EditError::DegenerateGeometry {
                remaining: n,
                minimum: self.minimum_vertices(),
            });
        }

        let expected_segments = if self.closed { n } else { n - 1 };
        if self.segments.len() != expected_segments {
            return Err(EditError::topology(format!(
                "{} Segmente erwartet, {} vorhanden",
                expected_segments,
                self.segments.len()
            )));
        }

        let mut outgoing = vec![0u32; n];
        let mut incoming = vec![0u32; n];
        for segment in &self.segments {
            if segment.start >= n || segment.end >= n {
                return Err(EditError::topology(format!(
                    "Segment ({} -> {}) zeigt ausserhalb der Linie",
                    segment.start, segment.end
                )));
            }
            outgoing[segment.start] += 1;
            incoming[segment.end] += 1;
        }

        for v in 0..n {
            let expect_out = u32::from(self.closed || v != n - 1);
            let expect_in = u32::from(self.closed || v != 0);
            if outgoing[v] != expect_out || incoming[v] != expect_in {
                return Err(EditError::topology(format!(
                    "Vertex {v}: {} ausgehende / {} eingehende Segmente",
                    outgoing[v], incoming[v]
                )));
            }
        }

        if self.closed && !self.segments.contains(&LineSegment::new(n - 1, 0)) {
            return Err(EditError::topology("Wrap-Segment (n-1 -> 0) fehlt"));
        }

        Ok(())
    }
}

/// Nächster Punkt auf der Strecke `[a, b]`.
pub fn closest_point_on_segment(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}
