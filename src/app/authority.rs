//! Single-Writer-Authority als tokio-Actor.
//!
//! Der Actor besitzt den [`EditorState`] exklusiv und arbeitet Requests strikt
//! in Ankunftsreihenfolge ab. Damit ist jede autoritative Mutation serialisiert;
//! bei konkurrierenden Checkouts gewinnt der zuerst eingetroffene Request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::Vec3;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::controller::RequestController;
use super::replication::ReplicationEvent;
use super::session::CheckinMode;
use super::{EditReply, EditRequest, EditorState};
use crate::core::{
    EditError, EditResult, FeatureId, FeaturePart, GeometryRecord, LayerId, MoveOp, ReplicaId,
    SpatialMatch, VertexHandle, VertexId,
};

/// Replika-ID der Authority selbst (z.B. für Host-seitige Requests).
pub const AUTHORITY_REPLICA: ReplicaId = ReplicaId(0);

/// Anfangszustand für eine neue Replika plus Event-Strom ab genau diesem Stand.
pub struct Subscription {
    pub snapshot: Vec<ReplicationEvent>,
    pub events: broadcast::Receiver<ReplicationEvent>,
}

enum Envelope {
    Request {
        by: ReplicaId,
        request: EditRequest,
        reply: oneshot::Sender<EditResult<EditReply>>,
    },
    Subscribe {
        reply: oneshot::Sender<Subscription>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Klonbarer RPC-Zugang zur Authority.
#[derive(Clone)]
pub struct AuthorityHandle {
    tx: mpsc::Sender<Envelope>,
    next_replica: Arc<AtomicU64>,
}

impl AuthorityHandle {
    /// Vergibt eine neue, eindeutige Replika-ID.
    pub fn allocate_replica_id(&self) -> ReplicaId {
        ReplicaId(self.next_replica.fetch_add(1, Ordering::Relaxed))
    }

    /// Schickt einen Request und wartet auf das Ergebnis.
    pub async fn request(&self, by: ReplicaId, request: EditRequest) -> EditResult<EditReply> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Request { by, request, reply })
            .await
            .map_err(|_| EditError::AuthorityUnavailable)?;
        rx.await.map_err(|_| EditError::AuthorityUnavailable)?
    }

    /// `requestCheckout(layer, checkout)`: `false` checkt mit Commit ein.
    pub async fn request_checkout(
        &self,
        by: ReplicaId,
        layer: LayerId,
        checkout: bool,
    ) -> EditResult<()> {
        self.request(by, EditRequest::Checkout { layer, checkout })
            .await
            .map(|_| ())
    }

    /// `requestSave(layer)`: persistiert auf der Authority.
    pub async fn request_save(&self, by: ReplicaId, layer: LayerId) -> EditResult<()> {
        self.request(by, EditRequest::Save { layer }).await.map(|_| ())
    }

    /// Snapshot und Event-Strom für eine neue Replika.
    pub async fn subscribe(&self) -> EditResult<Subscription> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Subscribe { reply })
            .await
            .map_err(|_| EditError::AuthorityUnavailable)?;
        rx.await.map_err(|_| EditError::AuthorityUnavailable)
    }

    /// Beendet den Actor; der Baum wird dabei blattweise zerstört.
    pub async fn shutdown(&self) -> EditResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Shutdown { reply })
            .await
            .map_err(|_| EditError::AuthorityUnavailable)?;
        rx.await.map_err(|_| EditError::AuthorityUnavailable)
    }

    /// `true`, solange der Actor Requests annimmt.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Startet den Authority-Actor auf dem aktuellen tokio-Runtime.
///
/// Der JoinHandle liefert den Endzustand (Request-Log, leerer Baum) nach dem Shutdown.
pub fn spawn_authority(state: EditorState) -> (AuthorityHandle, JoinHandle<EditorState>) {
    let (tx, rx) = mpsc::channel(state.options.request_queue_capacity.max(1));
    let handle = AuthorityHandle {
        tx,
        next_replica: Arc::new(AtomicU64::new(AUTHORITY_REPLICA.get() + 1)),
    };
    let actor = Authority {
        state,
        controller: RequestController::new(),
        rx,
    };
    (handle, tokio::spawn(actor.run()))
}

struct Authority {
    state: EditorState,
    controller: RequestController,
    rx: mpsc::Receiver<Envelope>,
}

impl Authority {
    async fn run(mut self) -> EditorState {
        log::info!(
            "Authority gestartet ({} Layer)",
            self.state.tree.len()
        );

        let mut shutdown_reply = None;
        while let Some(envelope) = self.rx.recv().await {
            match envelope {
                Envelope::Request { by, request, reply } => {
                    let result = self
                        .controller
                        .handle_request(&mut self.state, by, request)
                        .await;
                    // Replika wartet evtl. nicht mehr; das Ergebnis gilt trotzdem
                    let _ = reply.send(result);
                }
                Envelope::Subscribe { reply } => {
                    let mut snapshot = self.state.tree.snapshot_events();
                    snapshot.extend(self.state.session.snapshot_events());
                    let events = self.state.tree.subscribe();
                    let _ = reply.send(Subscription { snapshot, events });
                }
                Envelope::Shutdown { reply } => {
                    shutdown_reply = Some(reply);
                    break;
                }
            }
        }

        self.rx.close();
        self.state.tree.destroy_all().await;
        log::info!(
            "Authority beendet ({} Requests verarbeitet)",
            self.state.request_log.len()
        );
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        self.state
    }
}

/// Bequeme Request-Konstruktoren für Client-Code.
impl AuthorityHandle {
    pub async fn checkin(&self, by: ReplicaId, layer: LayerId, mode: CheckinMode) -> EditResult<()> {
        self.request(by, EditRequest::Checkin { layer, mode })
            .await
            .map(|_| ())
    }

    pub async fn add_vertex(
        &self,
        by: ReplicaId,
        layer: LayerId,
        feature: FeatureId,
        position: Vec3,
    ) -> EditResult<VertexHandle> {
        match self
            .request(
                by,
                EditRequest::AddVertex {
                    layer,
                    feature,
                    position,
                },
            )
            .await?
        {
            EditReply::Vertex(handle) => Ok(handle),
            other => Err(unexpected(other)),
        }
    }

    pub async fn remove_vertex(
        &self,
        by: ReplicaId,
        layer: LayerId,
        feature: FeatureId,
        vertex: VertexId,
    ) -> EditResult<EditReply> {
        self.request(
            by,
            EditRequest::RemoveVertex {
                layer,
                feature,
                vertex,
            },
        )
        .await
    }

    pub async fn move_feature(
        &self,
        by: ReplicaId,
        layer: LayerId,
        feature: FeatureId,
        part: FeaturePart,
        op: MoveOp,
    ) -> EditResult<EditReply> {
        self.request(
            by,
            EditRequest::MoveFeature {
                layer,
                feature,
                part,
                op,
            },
        )
        .await
    }

    pub async fn add_feature(
        &self,
        by: ReplicaId,
        layer: LayerId,
        geometry: GeometryRecord,
        style: Option<usize>,
    ) -> EditResult<FeatureId> {
        match self
            .request(
                by,
                EditRequest::AddFeature {
                    layer,
                    geometry,
                    style,
                },
            )
            .await?
        {
            EditReply::Feature(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_closest(
        &self,
        by: ReplicaId,
        layer: LayerId,
        point: Vec3,
        exclude: Vec<FeatureId>,
    ) -> EditResult<Option<(LayerId, SpatialMatch)>> {
        match self
            .request(
                by,
                EditRequest::GetClosest {
                    layer,
                    point,
                    exclude,
                },
            )
            .await?
        {
            EditReply::Closest(hit) => Ok(hit),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(reply: EditReply) -> EditError {
    EditError::topology(format!("unerwartete Antwort der Authority: {reply:?}"))
}
