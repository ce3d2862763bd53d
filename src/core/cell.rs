//! Single-Writer-Wertzelle mit Änderungsmeldung.

use serde::{Deserialize, Serialize};

/// Änderung einer Zelle: vorheriger und neuer Wert, damit Beobachter diffen können.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChanged<T> {
    /// Wert vor der Änderung
    pub previous: T,
    /// Wert nach der Änderung
    pub current: T,
}

/// Autoritative Wertzelle.
///
/// Nur die Authority ruft `set` auf; Replikas spiegeln den Wert über die
/// gemeldeten [`ValueChanged`]-Notifications.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueCell<T> {
    value: T,
}

impl<T: Clone + PartialEq> ValueCell<T> {
    /// Erstellt eine Zelle mit Startwert.
    pub fn new(value: T) -> Self {
        Self { value }
    }

    /// Aktueller Wert.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Setzt den Wert; liefert die Änderung nur, wenn sich der Wert unterscheidet.
    pub fn set(&mut self, value: T) -> Option<ValueChanged<T>> {
        if self.value == value {
            return None;
        }
        let previous = std::mem::replace(&mut self.value, value);
        Some(ValueChanged {
            previous,
            current: self.value.clone(),
        })
    }
}
