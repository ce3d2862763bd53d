//! Globale Edit-Session: höchstens ein editierbarer Layer im ganzen Baum.

use super::layer::CheckoutState;
use super::layer_tree::LayerTree;
use super::replication::{ReplicationEvent, SessionEvent};
use crate::core::{EditError, EditResult, LayerId, ReplicaId};

/// Wie ein Check-in mit ausstehenden Änderungen umgeht.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinMode {
    /// Änderungen speichern; bei Fehler bleibt der Layer ausgecheckt.
    Commit,
    /// Änderungen seit dem letzten Checkpoint verwerfen.
    Discard,
}

/// Koordiniert Session-Start/-Ende sowie Checkout und Check-in des editierbaren Layers.
#[derive(Debug, Default)]
pub struct EditSessionController {
    active: bool,
    started_by: Option<ReplicaId>,
    editable: Option<(LayerId, ReplicaId)>,
}

impl EditSessionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Der editierbare Layer und sein Halter.
    pub fn editable(&self) -> Option<(LayerId, ReplicaId)> {
        self.editable
    }

    pub fn editable_layer(&self) -> Option<LayerId> {
        self.editable.map(|(layer, _)| layer)
    }

    /// Session-Ereignisse, die eine frische Replika nachholen muss.
    pub fn snapshot_events(&self) -> Vec<ReplicationEvent> {
        let mut out = Vec::new();
        if let (true, Some(by)) = (self.active, self.started_by) {
            out.push(ReplicationEvent::Session(SessionEvent::Started { by }));
        }
        if let Some((layer, holder)) = self.editable {
            out.push(ReplicationEvent::Session(SessionEvent::LayerCheckedOut {
                layer,
                holder,
            }));
        }
        out
    }

    /// Startet die Session; alle Layer nehmen einen Checkpoint für einen späteren Rollback.
    pub fn start(&mut self, tree: &mut LayerTree, by: ReplicaId) -> EditResult<()> {
        if self.active {
            return Err(EditError::SessionAlreadyActive);
        }
        if let Some((held, holder)) = self.editable {
            if holder != by {
                return Err(EditError::LayerAlreadyEditing { held });
            }
        }

        for root in tree.roots().to_vec() {
            tree.checkpoint(root)?;
        }
        self.active = true;
        self.started_by = Some(by);
        log::info!("Edit-Session gestartet von {}", by);
        tree.publish(ReplicationEvent::Session(SessionEvent::Started { by }));
        Ok(())
    }

    /// Speichert den ausgecheckten Layer und beendet die Session.
    ///
    /// Scheitert das Speichern, bleibt die Session aktiv und der Layer ausgecheckt.
    pub async fn stop_and_save(&mut self, tree: &mut LayerTree) -> EditResult<()> {
        if !self.active {
            return Err(EditError::SessionNotActive);
        }
        if let Some((layer, holder)) = self.editable {
            Self::commit(tree, layer, holder).await?;
            self.release(tree, layer, true)?;
        }

        self.active = false;
        self.started_by = None;
        log::info!("Edit-Session beendet (gespeichert)");
        tree.publish(ReplicationEvent::Session(SessionEvent::Stopped { saved: true }));
        Ok(())
    }

    /// Verwirft alle Änderungen seit den Checkpoints und beendet die Session.
    ///
    /// Jeder Layer wird auf seinen Checkpoint zurückgesetzt und neu gezeichnet,
    /// sodass kein `changed=true` zurückbleibt.
    pub async fn stop_and_discard(&mut self, tree: &mut LayerTree) -> EditResult<()> {
        if !self.active {
            return Err(EditError::SessionNotActive);
        }

        let mut restored = 0usize;
        for layer in tree.all_layers() {
            if tree.restore_checkpoint(layer)? {
                restored += 1;
            }
        }
        for root in tree.roots().to_vec() {
            tree.draw(root).await?;
        }
        if let Some((layer, _)) = self.editable {
            self.release(tree, layer, false)?;
        }

        self.active = false;
        self.started_by = None;
        log::info!(
            "Edit-Session beendet (verworfen, {} Layer zurückgesetzt)",
            restored
        );
        tree.publish(ReplicationEvent::Session(SessionEvent::Stopped { saved: false }));
        Ok(())
    }

    /// Checkt `layer` für `by` aus.
    ///
    /// Schlägt mit `AlreadyCheckedOut` fehl, wenn eine andere Replika den Layer hält,
    /// wenn ein fremder Halter den editierbaren Layer belegt oder der Layer nicht
    /// beschreibbar ist; mit `LayerAlreadyEditing`, wenn `by` selbst bereits
    /// einen anderen Layer hält. Erneuter Checkout durch den Halter ist ein No-op.
    pub fn checkout(&mut self, tree: &mut LayerTree, layer: LayerId, by: ReplicaId) -> EditResult<()> {
        let node = tree.layer(layer)?;
        if node.is_container() {
            return Err(EditError::topology(format!(
                "Container-Layer {layer} kann nicht ausgecheckt werden"
            )));
        }

        match self.editable {
            Some((held, holder)) if held == layer && holder == by => return Ok(()),
            Some((held, holder)) if holder == by => {
                return Err(EditError::LayerAlreadyEditing { held })
            }
            Some(_) => return Err(EditError::AlreadyCheckedOut(layer)),
            None => {}
        }
        if !node.is_writeable() || node.checkout_state().is_held() {
            return Err(EditError::AlreadyCheckedOut(layer));
        }

        tree.set_checkout(layer, CheckoutState::CheckedOut { holder: by })?;
        tree.clear_history(layer)?;
        tree.checkpoint(layer)?;
        self.editable = Some((layer, by));
        log::info!("Layer {} ausgecheckt von {}", layer, by);
        tree.publish(ReplicationEvent::Session(SessionEvent::LayerCheckedOut {
            layer,
            holder: by,
        }));
        Ok(())
    }

    /// Checkt `layer` wieder ein.
    pub async fn checkin(
        &mut self,
        tree: &mut LayerTree,
        layer: LayerId,
        by: ReplicaId,
        mode: CheckinMode,
    ) -> EditResult<()> {
        match self.editable {
            Some((held, holder)) if held == layer && holder == by => {}
            _ => return Err(EditError::NotEditable(layer)),
        }

        match mode {
            CheckinMode::Commit => Self::commit(tree, layer, by).await?,
            CheckinMode::Discard => {
                // Nach Edit + Undo teilt die Map schon den Checkpoint, `changed` steht aber noch
                let restored = tree.restore_checkpoint(layer)?;
                if restored || tree.layer(layer)?.is_changed() {
                    tree.draw(layer).await?;
                }
            }
        }
        self.release(tree, layer, mode == CheckinMode::Commit)
    }

    /// Speichert den Teilbaum von `layer`, ohne einen Checkout aufzugeben.
    ///
    /// Hält eine andere Replika einen Layer im Teilbaum, wird abgelehnt.
    pub async fn save(&mut self, tree: &mut LayerTree, layer: LayerId, by: ReplicaId) -> EditResult<()> {
        if let Some((held, holder)) = self.editable {
            if holder != by && tree.pre_order(layer)?.contains(&held) {
                return Err(EditError::NotEditable(held));
            }
            if holder == by && held == layer {
                Self::commit(tree, layer, holder).await?;
                tree.set_checkout(layer, CheckoutState::CheckedOut { holder })?;
                return tree.clear_history(layer);
            }
        }
        tree.save(layer).await
    }

    /// Prüft, ob `by` den Layer gerade editieren darf.
    pub fn ensure_editable(&self, tree: &LayerTree, layer: LayerId, by: ReplicaId) -> EditResult<()> {
        let state = tree.layer(layer)?.checkout_state();
        let held_by_requester = matches!(self.editable, Some((held, holder)) if held == layer && holder == by);
        if self.active && held_by_requester && state == (CheckoutState::CheckedOut { holder: by }) {
            Ok(())
        } else {
            Err(EditError::NotEditable(layer))
        }
    }

    /// Vergisst den editierbaren Layer, falls er in `destroyed` liegt.
    pub fn forget_layers(&mut self, tree: &LayerTree, destroyed: &[LayerId]) {
        if let Some((layer, _)) = self.editable {
            if destroyed.contains(&layer) {
                self.editable = None;
                tree.publish(ReplicationEvent::Session(SessionEvent::LayerCheckedIn {
                    layer,
                    committed: false,
                }));
            }
        }
    }

    async fn commit(tree: &mut LayerTree, layer: LayerId, holder: ReplicaId) -> EditResult<()> {
        tree.set_checkout(layer, CheckoutState::Committing { holder })?;
        match tree.save(layer).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tree.set_checkout(layer, CheckoutState::CheckedOut { holder })?;
                Err(e)
            }
        }
    }

    fn release(&mut self, tree: &mut LayerTree, layer: LayerId, committed: bool) -> EditResult<()> {
        tree.set_checkout(layer, CheckoutState::Available)?;
        tree.clear_history(layer)?;
        self.editable = None;
        log::info!(
            "Layer {} eingecheckt ({})",
            layer,
            if committed { "gespeichert" } else { "verworfen" }
        );
        tree.publish(ReplicationEvent::Session(SessionEvent::LayerCheckedIn {
            layer,
            committed,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::layer_tree::LayerSpec;
    use crate::app::loader::MemoryLoader;
    use crate::core::{FeatureShape, LayerMetadata};
    use crate::shared::EditorOptions;
    use std::sync::Arc;

    const X: ReplicaId = ReplicaId(1);
    const Y: ReplicaId = ReplicaId(2);

    fn tree_with_two_layers() -> (LayerTree, LayerId, LayerId) {
        let mut tree = LayerTree::new(&EditorOptions::default());
        let leaf = |name: &str| {
            LayerSpec::leaf(
                LayerMetadata::named(name),
                Arc::new(MemoryLoader::new(FeatureShape::Point)),
            )
        };
        let l1 = tree.add_layer(None, leaf("L1")).expect("L1");
        let l2 = tree.add_layer(None, leaf("L2")).expect("L2");
        (tree, l1, l2)
    }

    #[test]
    fn test_start_twice_fails() {
        let (mut tree, _, _) = tree_with_two_layers();
        let mut session = EditSessionController::new();

        session.start(&mut tree, X).expect("erster Start");
        assert_eq!(session.start(&mut tree, X), Err(EditError::SessionAlreadyActive));
    }

    #[tokio::test]
    async fn test_checkout_contention_between_replicas() {
        let (mut tree, l1, _) = tree_with_two_layers();
        let mut session = EditSessionController::new();

        session.checkout(&mut tree, l1, X).expect("X checkt aus");
        assert_eq!(
            session.checkout(&mut tree, l1, Y),
            Err(EditError::AlreadyCheckedOut(l1))
        );

        session
            .checkin(&mut tree, l1, X, CheckinMode::Commit)
            .await
            .expect("X checkt ein");
        session.checkout(&mut tree, l1, Y).expect("Y checkt aus");
        assert_eq!(session.editable(), Some((l1, Y)));
    }

    #[test]
    fn test_second_layer_for_same_holder_is_rejected() {
        let (mut tree, l1, l2) = tree_with_two_layers();
        let mut session = EditSessionController::new();

        session.checkout(&mut tree, l1, X).expect("L1");
        assert_eq!(
            session.checkout(&mut tree, l2, X),
            Err(EditError::LayerAlreadyEditing { held: l1 })
        );
        assert_eq!(
            session.checkout(&mut tree, l2, Y),
            Err(EditError::AlreadyCheckedOut(l2))
        );
    }

    #[test]
    fn test_checkout_of_read_only_layer_fails() {
        let (mut tree, l1, _) = tree_with_two_layers();
        tree.set_writeable(l1, false).expect("schreibgeschützt");
        let mut session = EditSessionController::new();

        assert_eq!(
            session.checkout(&mut tree, l1, X),
            Err(EditError::AlreadyCheckedOut(l1))
        );
    }

    #[test]
    fn test_ensure_editable_requires_session_and_checkout() {
        let (mut tree, l1, _) = tree_with_two_layers();
        let mut session = EditSessionController::new();

        session.checkout(&mut tree, l1, X).expect("checkout");
        assert_eq!(
            session.ensure_editable(&tree, l1, X),
            Err(EditError::NotEditable(l1))
        );

        session.start(&mut tree, X).expect("start");
        assert!(session.ensure_editable(&tree, l1, X).is_ok());
        assert_eq!(
            session.ensure_editable(&tree, l1, Y),
            Err(EditError::NotEditable(l1))
        );
    }

    #[test]
    fn test_start_fails_while_other_replica_edits() {
        let (mut tree, l1, _) = tree_with_two_layers();
        let mut session = EditSessionController::new();

        session.checkout(&mut tree, l1, X).expect("checkout");
        assert_eq!(
            session.start(&mut tree, Y),
            Err(EditError::LayerAlreadyEditing { held: l1 })
        );
    }

    #[tokio::test]
    async fn test_stop_without_session_fails() {
        let (mut tree, _, _) = tree_with_two_layers();
        let mut session = EditSessionController::new();

        assert_eq!(
            session.stop_and_save(&mut tree).await,
            Err(EditError::SessionNotActive)
        );
        assert_eq!(
            session.stop_and_discard(&mut tree).await,
            Err(EditError::SessionNotActive)
        );
    }

    #[tokio::test]
    async fn test_stop_and_save_releases_layer() {
        let (mut tree, l1, _) = tree_with_two_layers();
        let mut session = EditSessionController::new();
        session.checkout(&mut tree, l1, X).expect("checkout");
        session.start(&mut tree, X).expect("start");

        session.stop_and_save(&mut tree).await.expect("stop");

        assert!(!session.is_active());
        assert_eq!(session.editable(), None);
        let node = tree.layer(l1).expect("Layer");
        assert!(!node.is_checked_out());
        assert_eq!(node.checkout_state(), CheckoutState::Available);
    }
}
