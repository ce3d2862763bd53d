//! Replika-Client: read-only Spiegel plus Request-Weiterleitung an die Authority.
//!
//! Eine Replika schreibt nie direkt in den Spiegel. Jede Mutation geht als
//! Request an die Authority; sichtbar wird sie erst, wenn das zugehörige
//! Replikations-Event per [`Replica::sync`] angewendet wurde.

use glam::Vec3;
use tokio::sync::broadcast::{self, error::TryRecvError};

use super::authority::AuthorityHandle;
use super::replication::{LayerMirror, ReplicationEvent};
use super::session::CheckinMode;
use super::use_cases::editing::{MoveResult, RemoveVertexResult};
use super::{EditReply, EditRequest};
use crate::core::{
    EditError, EditResult, FeatureId, FeaturePart, GeometryRecord, LayerId, LayerMetadata,
    MoveOp, ReplicaId, SpatialMatch, VertexHandle, VertexId,
};

/// Ein Teilnehmer mit eigener Replika-ID und eventual-konsistentem Spiegel.
pub struct Replica {
    id: ReplicaId,
    handle: AuthorityHandle,
    mirror: LayerMirror,
    events: broadcast::Receiver<ReplicationEvent>,
}

impl Replica {
    /// Meldet eine neue Replika an und übernimmt den aktuellen Snapshot.
    pub async fn connect(handle: AuthorityHandle) -> EditResult<Self> {
        let id = handle.allocate_replica_id();
        let subscription = handle.subscribe().await?;
        let mut mirror = LayerMirror::new();
        for event in &subscription.snapshot {
            mirror.apply(event);
        }
        log::debug!(
            "Replika {} verbunden ({} Layer gespiegelt)",
            id,
            mirror.layer_count()
        );
        Ok(Self {
            id,
            handle,
            mirror,
            events: subscription.events,
        })
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn mirror(&self) -> &LayerMirror {
        &self.mirror
    }

    pub fn handle(&self) -> &AuthorityHandle {
        &self.handle
    }

    /// Wendet alle bisher eingetroffenen Events an; liefert deren Anzahl.
    ///
    /// Ist der Empfänger zurückgefallen, wird der Spiegel aus einem frischen
    /// Snapshot neu aufgebaut.
    pub async fn sync(&mut self) -> EditResult<usize> {
        let mut applied = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.mirror.apply(&event);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => return Ok(applied),
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Replika {}: {} Events verpasst, Resynchronisation",
                        self.id,
                        skipped
                    );
                    applied += self.resync().await?;
                }
                Err(TryRecvError::Closed) => return Err(EditError::AuthorityUnavailable),
            }
        }
    }

    async fn resync(&mut self) -> EditResult<usize> {
        let subscription = self.handle.subscribe().await?;
        self.mirror.reset();
        for event in &subscription.snapshot {
            self.mirror.apply(event);
        }
        self.events = subscription.events;
        Ok(subscription.snapshot.len())
    }

    async fn request(&self, request: EditRequest) -> EditResult<EditReply> {
        self.handle.request(self.id, request).await
    }

    // === Checkout & Session ===

    /// `requestCheckout(layer, true)`
    pub async fn checkout(&self, layer: LayerId) -> EditResult<()> {
        self.handle.request_checkout(self.id, layer, true).await
    }

    /// `requestCheckout(layer, false)`: Check-in mit Commit.
    pub async fn checkin(&self, layer: LayerId) -> EditResult<()> {
        self.handle.request_checkout(self.id, layer, false).await
    }

    /// Check-in ohne Speichern; verwirft alle Änderungen seit dem Checkpoint.
    pub async fn discard(&self, layer: LayerId) -> EditResult<()> {
        self.handle
            .checkin(self.id, layer, CheckinMode::Discard)
            .await
    }

    /// `requestSave(layer)`: wird immer auf der Authority ausgeführt.
    pub async fn save(&self, layer: LayerId) -> EditResult<()> {
        self.handle.request_save(self.id, layer).await
    }

    pub async fn start_session(&self) -> EditResult<()> {
        self.request(EditRequest::StartSession).await.map(|_| ())
    }

    pub async fn stop_and_save(&self) -> EditResult<()> {
        self.request(EditRequest::StopAndSave).await.map(|_| ())
    }

    pub async fn stop_and_discard(&self) -> EditResult<()> {
        self.request(EditRequest::StopAndDiscard).await.map(|_| ())
    }

    // === Editing ===

    pub async fn add_vertex(
        &self,
        layer: LayerId,
        feature: FeatureId,
        position: Vec3,
    ) -> EditResult<VertexHandle> {
        self.handle
            .add_vertex(self.id, layer, feature, position)
            .await
    }

    pub async fn remove_vertex(
        &self,
        layer: LayerId,
        feature: FeatureId,
        vertex: VertexId,
    ) -> EditResult<RemoveVertexResult> {
        match self
            .handle
            .remove_vertex(self.id, layer, feature, vertex)
            .await?
        {
            EditReply::VertexRemoved(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    pub async fn move_feature(
        &self,
        layer: LayerId,
        feature: FeatureId,
        part: FeaturePart,
        op: MoveOp,
    ) -> EditResult<MoveResult> {
        match self
            .handle
            .move_feature(self.id, layer, feature, part, op)
            .await?
        {
            EditReply::Moved(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    pub async fn add_feature(
        &self,
        layer: LayerId,
        geometry: GeometryRecord,
        style: Option<usize>,
    ) -> EditResult<FeatureId> {
        self.handle
            .add_feature(self.id, layer, geometry, style)
            .await
    }

    pub async fn delete_feature(&self, layer: LayerId, feature: FeatureId) -> EditResult<()> {
        self.request(EditRequest::DeleteFeature { layer, feature })
            .await
            .map(|_| ())
    }

    /// Ersetzt die Selektion; liefert die Anzahl selektierter Features.
    pub async fn select(&self, layer: LayerId, ids: Vec<FeatureId>) -> EditResult<usize> {
        match self
            .request(EditRequest::SelectFeatures { layer, ids })
            .await?
        {
            EditReply::Selected(count) => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_block_move(
        &self,
        layer: LayerId,
        feature: FeatureId,
        block_move: bool,
    ) -> EditResult<()> {
        self.request(EditRequest::SetBlockMove {
            layer,
            feature,
            block_move,
        })
        .await
        .map(|_| ())
    }

    pub async fn undo(&self, layer: LayerId) -> EditResult<bool> {
        self.stepped(EditRequest::Undo { layer }).await
    }

    pub async fn redo(&self, layer: LayerId) -> EditResult<bool> {
        self.stepped(EditRequest::Redo { layer }).await
    }

    async fn stepped(&self, request: EditRequest) -> EditResult<bool> {
        match self.request(request).await? {
            EditReply::Stepped(applied) => Ok(applied),
            other => Err(unexpected(other)),
        }
    }

    // === Metadaten & Lebenszyklus ===

    pub async fn set_metadata(&self, layer: LayerId, metadata: LayerMetadata) -> EditResult<()> {
        self.request(EditRequest::SetMetadata { layer, metadata })
            .await
            .map(|_| ())
    }

    pub async fn load(&self, layer: LayerId) -> EditResult<()> {
        self.request(EditRequest::Load { layer }).await.map(|_| ())
    }

    pub async fn draw(&self, layer: LayerId) -> EditResult<()> {
        self.request(EditRequest::Draw { layer }).await.map(|_| ())
    }

    pub async fn destroy_layer(&self, layer: LayerId) -> EditResult<()> {
        self.request(EditRequest::DestroyLayer { layer })
            .await
            .map(|_| ())
    }

    pub async fn get_closest(
        &self,
        layer: LayerId,
        point: Vec3,
        exclude: Vec<FeatureId>,
    ) -> EditResult<Option<(LayerId, SpatialMatch)>> {
        self.handle
            .get_closest(self.id, layer, point, exclude)
            .await
    }
}

fn unexpected(reply: EditReply) -> EditError {
    EditError::topology(format!("unerwartete Antwort der Authority: {reply:?}"))
}
