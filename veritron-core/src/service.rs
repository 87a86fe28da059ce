use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;

use crate::{
    api::{
        AuthToken, Comment, CommentId, Item, ItemId, NewItem, NewSession, NewViewer, Uuid, Viewer,
        VoteTally,
    },
    ActionGate, CommentStore, Error, IdentityProvider, ItemStore, Subscription, Synchronizer,
    ViewerDirectory, VoteLedger,
};

/// Everything the outer surfaces (http server, cli, tests) can do with items,
/// votes, comments and viewers
#[derive(Clone)]
pub struct Service {
    items: Arc<dyn ItemStore>,
    identity: Arc<dyn IdentityProvider>,
    directory: Arc<dyn ViewerDirectory>,
    ledger: VoteLedger,
    sync: Synchronizer,
    gate: ActionGate,
}

impl Service {
    pub fn new(
        items: Arc<dyn ItemStore>,
        comments: Arc<dyn CommentStore>,
        identity: Arc<dyn IdentityProvider>,
        directory: Arc<dyn ViewerDirectory>,
    ) -> Service {
        let ledger = VoteLedger::new(items.clone());
        let sync = Synchronizer::new(comments);
        Service {
            items,
            identity,
            directory,
            gate: ActionGate::new(ledger.clone(), sync.clone()),
            ledger,
            sync,
        }
    }

    /// Builds a service whose stores are all provided by the same backend
    pub fn from_backend<B>(backend: Arc<B>) -> Service
    where
        B: 'static + ItemStore + CommentStore + IdentityProvider + ViewerDirectory,
    {
        Service::new(backend.clone(), backend.clone(), backend.clone(), backend)
    }

    pub async fn get_item(&self, item: ItemId) -> Result<Item, Error> {
        self.items
            .get_item(item)
            .await
            .with_context(|| format!("fetching item {item:?}"))?
            .ok_or_else(|| Error::not_found(item))
    }

    /// All items, newest first
    pub async fn list_items(&self) -> Result<Vec<Item>, Error> {
        let mut items = self.items.list_items().await.context("listing items")?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    pub async fn create_item(&self, item: NewItem) -> Result<Item, Error> {
        item.validate()?;
        let item = item.into_item(Utc::now());
        self.items.create_item(item.clone()).await?;
        tracing::info!(item = ?item.id, "created item");
        Ok(item)
    }

    pub async fn tally(&self, item: ItemId) -> Result<VoteTally, Error> {
        self.ledger.tally(item).await
    }

    pub async fn toggle_vote(
        &self,
        viewer: Option<&Viewer>,
        item: ItemId,
    ) -> Result<VoteTally, Error> {
        self.gate.toggle_vote(viewer, item).await
    }

    /// Snapshot of the comments of `item`, newest first
    pub async fn list_comments(&self, item: ItemId) -> Result<Vec<Comment>, Error> {
        self.sync.list(item).await
    }

    pub async fn subscribe_comments(&self, item: ItemId) -> Result<Subscription, Error> {
        self.sync.subscribe(item).await
    }

    pub async fn submit_comment(
        &self,
        viewer: Option<&Viewer>,
        item: ItemId,
        text: String,
    ) -> Result<Comment, Error> {
        self.submit_comment_with_id(viewer, item, CommentId(Uuid::new_v4()), text)
            .await
    }

    /// Same as `submit_comment`, with an id already chosen by the caller to
    /// match a displayed placeholder
    pub async fn submit_comment_with_id(
        &self,
        viewer: Option<&Viewer>,
        item: ItemId,
        id: CommentId,
        text: String,
    ) -> Result<Comment, Error> {
        self.gate.submit_comment(viewer, item, id, text).await
    }

    /// `None` both without a token and for a token that matches no session. The
    /// caller decides whether the latter is anonymous or refused.
    pub async fn current_viewer(&self, token: Option<AuthToken>) -> Result<Option<Viewer>, Error> {
        let token = match token {
            Some(token) => token,
            None => return Ok(None),
        };
        Ok(self
            .identity
            .current_viewer(token)
            .await
            .context("resolving viewer from session")?)
    }

    pub async fn create_viewer(&self, viewer: NewViewer) -> Result<(), Error> {
        viewer.validate()?;
        self.directory.create_viewer(viewer).await
    }

    pub async fn open_session(&self, session: NewSession) -> Result<AuthToken, Error> {
        session.validate()?;
        self.directory.open_session(session).await
    }

    pub async fn close_session(&self, token: AuthToken) -> Result<(), Error> {
        self.directory.close_session(token).await
    }
}
