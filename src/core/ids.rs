//! Stabile Identitäten für Layer, Features, Vertices und Replikas.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Liefert den rohen Zahlenwert.
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Identität eines Layers; wird einmal vergeben und nie neu zugewiesen.
    LayerId,
    "L"
);
numeric_id!(
    /// Identität eines Features, unabhängig von der Layer-ID.
    FeatureId,
    "F"
);
numeric_id!(
    /// Stabile Identität eines Vertex (Handle-Sub-Feature) innerhalb eines Features.
    VertexId,
    "V"
);
numeric_id!(
    /// Identität einer Replika (Client oder Authority).
    ReplicaId,
    "R"
);

/// Monotoner Zähler für neue IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Erstellt einen Zähler, der bei `first` beginnt.
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Vergibt die nächste freie Nummer.
    pub fn allocate(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Nächste Nummer, ohne sie zu vergeben.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Stellt sicher, dass `used` nie erneut vergeben wird.
    pub fn reserve(&mut self, used: u64) {
        if used >= self.next {
            self.next = used + 1;
        }
    }
}
