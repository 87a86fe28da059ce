use crate::{
    api::{Comment, CommentId, ItemId, NewComment, Viewer, VoteTally},
    Error, Synchronizer, VoteLedger,
};

/// Guards the mutating operations behind the presence of a viewer identity.
///
/// The identity is handed in by the caller for each call. Without one, calls
/// fail with `AuthRequired` before touching any store.
#[derive(Clone)]
pub struct ActionGate {
    ledger: VoteLedger,
    sync: Synchronizer,
}

impl ActionGate {
    pub fn new(ledger: VoteLedger, sync: Synchronizer) -> ActionGate {
        ActionGate { ledger, sync }
    }

    fn identify(viewer: Option<&Viewer>) -> Result<&Viewer, Error> {
        viewer.ok_or_else(|| {
            tracing::debug!("refusing mutation from anonymous viewer");
            Error::auth_required()
        })
    }

    pub async fn toggle_vote(
        &self,
        viewer: Option<&Viewer>,
        item: ItemId,
    ) -> Result<VoteTally, Error> {
        let viewer = Self::identify(viewer)?;
        self.ledger.toggle(item, viewer.id).await
    }

    /// `id` is chosen by the submitter, so that a placeholder can be shown
    /// before the store confirms
    pub async fn submit_comment(
        &self,
        viewer: Option<&Viewer>,
        item: ItemId,
        id: CommentId,
        text: String,
    ) -> Result<Comment, Error> {
        let viewer = Self::identify(viewer)?;
        self.sync
            .submit(NewComment {
                id,
                item_id: item,
                author_id: viewer.id,
                text,
            })
            .await
    }
}
