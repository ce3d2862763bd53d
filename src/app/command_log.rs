//! Begrenztes Log der von der Authority verarbeiteten Requests.

use crate::core::{EditError, LayerId, ReplicaId};

/// Ein verarbeiteter Request in Ankunftsreihenfolge.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedRequest {
    /// Laufende Nummer (Totalordnung der Ankunft)
    pub sequence: u64,
    /// Anfragende Replika
    pub requester: ReplicaId,
    /// Kurzname der Operation
    pub action: &'static str,
    /// Betroffener Layer, falls vorhanden
    pub layer: Option<LayerId>,
    /// Fehler, falls abgelehnt
    pub error: Option<EditError>,
}

impl LoggedRequest {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Speichert verarbeitete Requests in Reihenfolge.
pub struct RequestLog {
    entries: Vec<LoggedRequest>,
    next_sequence: u64,
    max_entries: usize,
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(crate::shared::options::REQUEST_LOG_CAPACITY)
    }
}

impl RequestLog {
    /// Erstellt ein leeres Log mit maximaler Länge.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 1,
            max_entries: max_entries.max(2),
        }
    }

    /// Fügt einen verarbeiteten Request hinzu und liefert seine Laufnummer.
    /// Begrenzt auf `max_entries`, ältere Einträge werden verworfen.
    pub fn record(
        &mut self,
        requester: ReplicaId,
        action: &'static str,
        layer: Option<LayerId>,
        error: Option<EditError>,
    ) -> u64 {
        if self.entries.len() >= self.max_entries {
            self.entries.drain(..self.max_entries / 2);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(LoggedRequest {
            sequence,
            requester,
            action,
            layer,
            error,
        });
        sequence
    }

    /// Gibt die Anzahl der geloggten Requests zurück.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Gibt `true` zurück, wenn keine Requests vorhanden sind.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Liefert eine read-only Sicht auf alle Einträge.
    pub fn entries(&self) -> &[LoggedRequest] {
        &self.entries
    }

    /// Anzahl abgelehnter Requests im aktuellen Fenster.
    pub fn rejected(&self) -> usize {
        self.entries.iter().filter(|e| !e.succeeded()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic_across_trimming() {
        let mut log = RequestLog::new(4);
        let mut last = 0;
        for _ in 0..10 {
            let seq = log.record(ReplicaId(1), "checkout", Some(LayerId(1)), None);
            assert!(seq > last);
            last = seq;
        }

        assert!(log.len() <= 4);
        assert_eq!(log.entries().last().map(|e| e.sequence), Some(10));
    }

    #[test]
    fn test_rejected_counts_errors() {
        let mut log = RequestLog::new(10);
        log.record(ReplicaId(1), "checkout", Some(LayerId(2)), None);
        log.record(
            ReplicaId(2),
            "checkout",
            Some(LayerId(2)),
            Some(EditError::AlreadyCheckedOut(LayerId(2))),
        );

        assert_eq!(log.rejected(), 1);
        assert!(!log.is_empty());
    }
}
