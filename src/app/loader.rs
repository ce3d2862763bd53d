//! Vertrag zum externen Loader-Kollaborateur eines Layers.
//!
//! Ein Loader kennt das Quellformat (Datei, Dienst, Raster) und die
//! Materialisierung für die Darstellung. Der Kern ruft ihn nur über diese
//! Schnittstelle auf; alle async-Methoden liefern `'static`-Futures, damit
//! der Layer-Baum sie als abbrechbare tokio-Tasks starten kann.

use std::sync::{Arc, Mutex};

use futures_util::future::{self, BoxFuture};

use crate::core::{
    EditError, EditResult, FeatureRecord, FeatureShape, GeometryRecord, LayerId, LayerMetadata,
};

/// Was ein Loader über den Layer wissen muss, für den er arbeitet.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSource {
    pub layer: LayerId,
    pub metadata: LayerMetadata,
}

impl LayerSource {
    /// Quellreferenz aus den Metadaten.
    pub fn uri(&self) -> Option<&str> {
        self.metadata.source.as_deref()
    }
}

/// Ein Loader pro Geometrieart.
pub trait LayerLoader: Send + Sync {
    /// Welche Feature-Form neue Features dieses Layers haben.
    fn feature_shape(&self) -> FeatureShape;

    /// Liest die Features der Quelle. Fehler werden vom Layer still behandelt.
    fn init(&self, source: LayerSource) -> BoxFuture<'static, anyhow::Result<Vec<FeatureRecord>>>;

    /// Materialisiert die aktuellen Features neu (nur Seiteneffekt).
    fn draw(
        &self,
        source: LayerSource,
        features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>>;

    /// Persistiert die Features in die Quelle. Fehler müssen gemeldet werden.
    fn save(
        &self,
        source: LayerSource,
        features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>>;

    /// Wird gerufen, nachdem der Layer einen neuen Checkpoint gesetzt hat.
    ///
    /// Den Snapshot selbst hält die Layer-Historie; ein Loader kann hier
    /// z.B. eine Quell-Version festhalten. Standard: nichts.
    fn checkpoint(&self, _source: &LayerSource) {}

    /// Baut einen neuen Feature-Record aus einer Geometrie.
    ///
    /// Standardverhalten: die Geometrie muss zur `feature_shape` passen.
    fn build_feature(&self, geometry: GeometryRecord) -> EditResult<FeatureRecord> {
        let expected = self.feature_shape();
        if expected != FeatureShape::None && geometry.shape() != expected {
            return Err(EditError::topology(format!(
                "Layer erwartet {:?}, erhalten {:?}",
                expected,
                geometry.shape()
            )));
        }
        Ok(FeatureRecord::new(geometry))
    }
}

/// Loader ohne externe Quelle: hält die zuletzt gespeicherten Features im Speicher.
///
/// Dient für Scratch-Layer und als Referenz-Implementierung des Vertrags.
#[derive(Debug, Clone)]
pub struct MemoryLoader {
    shape: FeatureShape,
    stored: Arc<Mutex<Vec<FeatureRecord>>>,
}

impl MemoryLoader {
    /// Leerer Speicher für Features der Form `shape`.
    pub fn new(shape: FeatureShape) -> Self {
        Self::with_features(shape, Vec::new())
    }

    /// Vorbefüllter Speicher.
    pub fn with_features(shape: FeatureShape, features: Vec<FeatureRecord>) -> Self {
        Self {
            shape,
            stored: Arc::new(Mutex::new(features)),
        }
    }

    /// Aktuell gespeicherte Features (Stand des letzten `save`).
    pub fn stored(&self) -> Vec<FeatureRecord> {
        match self.stored.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LayerLoader for MemoryLoader {
    fn feature_shape(&self) -> FeatureShape {
        self.shape
    }

    fn init(&self, _source: LayerSource) -> BoxFuture<'static, anyhow::Result<Vec<FeatureRecord>>> {
        Box::pin(future::ready(Ok(self.stored())))
    }

    fn draw(
        &self,
        source: LayerSource,
        features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        log::debug!(
            "Layer {} materialisiert {} Features (Speicher)",
            source.layer,
            features.len()
        );
        Box::pin(future::ready(Ok(())))
    }

    fn save(
        &self,
        _source: LayerSource,
        features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        let stored = Arc::clone(&self.stored);
        Box::pin(async move {
            let mut guard = stored
                .lock()
                .map_err(|_| anyhow::anyhow!("Feature-Speicher ist vergiftet"))?;
            *guard = features;
            Ok(())
        })
    }
}
