use std::{collections::BTreeSet, pin::Pin};

use async_trait::async_trait;
use futures::Stream;

use crate::{
    api::{
        AuthToken, Comment, CommentEvent, Item, ItemId, NewComment, NewSession, NewViewer, Viewer,
        ViewerId,
    },
    Error,
};

/// Live append events for one item. Dropping the stream releases the feed.
pub type CommentFeed = Pin<Box<dyn Send + Stream<Item = anyhow::Result<CommentEvent>>>>;

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get_item(&self, item: ItemId) -> anyhow::Result<Option<Item>>;

    /// All items, newest first
    async fn list_items(&self) -> anyhow::Result<Vec<Item>>;

    async fn create_item(&self, item: Item) -> Result<(), Error>;

    /// Returns `None` if the item does not exist
    async fn fetch_voters(&self, item: ItemId) -> anyhow::Result<Option<BTreeSet<ViewerId>>>;

    /// Overwrites the whole voter set. Returns `false` if the item does not exist.
    async fn write_voters(&self, item: ItemId, voters: BTreeSet<ViewerId>) -> anyhow::Result<bool>;

    /// Adds `viewer` to the voters of `item` if absent, removes it otherwise, and
    /// returns the resulting set (`None` if the item does not exist).
    ///
    /// The provided implementation is a plain read-then-write: two concurrent
    /// toggles on the same item can lose one of the updates. Stores that have an
    /// atomic conditional update should override it.
    async fn toggle_voter(
        &self,
        item: ItemId,
        viewer: ViewerId,
    ) -> anyhow::Result<Option<BTreeSet<ViewerId>>> {
        let mut voters = match self.fetch_voters(item).await? {
            Some(voters) => voters,
            None => return Ok(None),
        };
        if !voters.remove(&viewer) {
            voters.insert(viewer);
        }
        match self.write_voters(item, voters.clone()).await? {
            true => Ok(Some(voters)),
            false => Ok(None),
        }
    }
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Current comments of `item`, newest first
    async fn list_comments(&self, item: ItemId) -> anyhow::Result<Vec<Comment>>;

    /// Durably appends the comment and returns its canonical version. The
    /// insertion is announced on the feeds of the item, not by this call.
    async fn append_comment(&self, comment: NewComment) -> Result<Comment, Error>;

    async fn subscribe(&self, item: ItemId) -> anyhow::Result<CommentFeed>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_viewer(&self, token: AuthToken) -> anyhow::Result<Option<Viewer>>;
}

#[async_trait]
pub trait ViewerDirectory: Send + Sync {
    async fn create_viewer(&self, viewer: NewViewer) -> Result<(), Error>;

    /// Fails with `PermissionDenied` on unknown user or wrong password
    async fn open_session(&self, session: NewSession) -> Result<AuthToken, Error>;

    async fn close_session(&self, token: AuthToken) -> Result<(), Error>;
}
