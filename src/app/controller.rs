//! Request-Controller: führt Requests auf dem autoritativen Zustand aus.

use std::collections::HashSet;

use super::session::CheckinMode;
use super::use_cases::{editing, metadata as layer_meta};
use super::{EditReply, EditRequest, EditorState};
use crate::core::{EditError, EditResult, ReplicaId};

/// Dispatcht Requests an Session, Layer-Baum und Use-Cases.
#[derive(Default)]
pub struct RequestController;

impl RequestController {
    /// Erstellt einen neuen Controller.
    pub fn new() -> Self {
        Self
    }

    /// Verarbeitet genau einen Request und protokolliert das Ergebnis.
    pub async fn handle_request(
        &mut self,
        state: &mut EditorState,
        by: ReplicaId,
        request: EditRequest,
    ) -> EditResult<EditReply> {
        let action = request.action();
        let layer = request.layer();

        let result = self.dispatch(state, by, request).await;

        let error = result.as_ref().err().cloned();
        match &error {
            Some(e) if e.is_contention() => {
                log::debug!("{} von {} abgelehnt (Konkurrenz): {}", action, by, e)
            }
            Some(e) => log::info!("{} von {} abgelehnt: {}", action, by, e),
            None => log::trace!("{} von {} ausgeführt", action, by),
        }
        state.request_log.record(by, action, layer, error);
        result
    }

    async fn dispatch(
        &mut self,
        state: &mut EditorState,
        by: ReplicaId,
        request: EditRequest,
    ) -> EditResult<EditReply> {
        // Load happens-before: Edits sehen nie einen halb geladenen Layer
        if let Some(layer) = request.layer() {
            if request.needs_loaded_layer() && state.tree.contains(layer) {
                state.tree.settle(layer).await?;
            }
        }

        let reply = match request {
            // === Checkout & Session ===
            EditRequest::Checkout {
                layer,
                checkout: true,
            } => {
                state.session.checkout(&mut state.tree, layer, by)?;
                EditReply::Done
            }
            EditRequest::Checkout {
                layer,
                checkout: false,
            } => {
                state
                    .session
                    .checkin(&mut state.tree, layer, by, CheckinMode::Commit)
                    .await?;
                EditReply::Done
            }
            EditRequest::Checkin { layer, mode } => {
                state
                    .session
                    .checkin(&mut state.tree, layer, by, mode)
                    .await?;
                EditReply::Done
            }
            EditRequest::Save { layer } => {
                state.session.save(&mut state.tree, layer, by).await?;
                EditReply::Done
            }
            EditRequest::StartSession => {
                state.session.start(&mut state.tree, by)?;
                EditReply::Done
            }
            EditRequest::StopAndSave => {
                state.session.stop_and_save(&mut state.tree).await?;
                EditReply::Done
            }
            EditRequest::StopAndDiscard => {
                state.session.stop_and_discard(&mut state.tree).await?;
                EditReply::Done
            }

            // === Geometrie-Editing ===
            EditRequest::AddVertex {
                layer,
                feature,
                position,
            } => EditReply::Vertex(editing::add_vertex(state, by, layer, feature, position)?),
            EditRequest::RemoveVertex {
                layer,
                feature,
                vertex,
            } => EditReply::VertexRemoved(editing::remove_vertex(
                state, by, layer, feature, vertex,
            )?),
            EditRequest::MoveFeature {
                layer,
                feature,
                part,
                op,
            } => EditReply::Moved(editing::move_feature(state, by, layer, feature, part, op)?),
            EditRequest::AddFeature {
                layer,
                geometry,
                style,
            } => EditReply::Feature(editing::add_feature(state, by, layer, geometry, style)?),
            EditRequest::DeleteFeature { layer, feature } => {
                editing::delete_feature(state, by, layer, feature)?;
                EditReply::Done
            }
            EditRequest::SelectFeatures { layer, ids } => {
                EditReply::Selected(editing::select_features(state, by, layer, &ids)?)
            }
            EditRequest::SetBlockMove {
                layer,
                feature,
                block_move,
            } => {
                editing::set_block_move(state, by, layer, feature, block_move)?;
                EditReply::Done
            }
            EditRequest::Undo { layer } => EditReply::Stepped(editing::undo(state, by, layer)?),
            EditRequest::Redo { layer } => EditReply::Stepped(editing::redo(state, by, layer)?),

            // === Metadaten ===
            EditRequest::SetMetadata { layer, metadata } => {
                layer_meta::set_metadata(state, by, layer, metadata)?;
                EditReply::Done
            }

            // === Lebenszyklus ===
            EditRequest::Load { layer } => {
                if let Some(held) = state.session.editable_layer() {
                    if state.tree.pre_order(layer)?.contains(&held) {
                        return Err(EditError::NotEditable(held));
                    }
                }
                state.tree.load(layer).await?;
                EditReply::Done
            }
            EditRequest::Draw { layer } => {
                state.tree.draw(layer).await?;
                EditReply::Done
            }
            EditRequest::DestroyLayer { layer } => {
                let destroyed = state.tree.post_order(layer)?;
                state.tree.destroy(layer).await?;
                state.session.forget_layers(&state.tree, &destroyed);
                EditReply::Done
            }

            // === Abfragen ===
            EditRequest::GetClosest {
                layer,
                point,
                exclude,
            } => {
                let exclude: HashSet<_> = exclude.into_iter().collect();
                EditReply::Closest(state.tree.get_closest(layer, point, &exclude)?)
            }
        };
        Ok(reply)
    }
}
