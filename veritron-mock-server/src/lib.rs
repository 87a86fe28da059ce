use std::{
    collections::{btree_map, hash_map, BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use veritron_core::{
    api::{
        AuthToken, Comment, CommentEvent, Error as ApiError, Item, ItemId, NewComment, NewSession,
        NewViewer, Uuid, Viewer, ViewerId,
    },
    CommentFeed, CommentStore, Error, IdentityProvider, ItemStore, ViewerDirectory,
};

/// In-memory backend implementing every store, with live per-item comment feeds
#[derive(Clone, Default)]
pub struct MockServer(Arc<Mutex<State>>);

#[derive(Default)]
struct State {
    viewers: BTreeMap<ViewerId, DbViewer>,
    sessions: HashMap<AuthToken, ViewerId>,
    items: HashMap<ItemId, Item>,
    comments: Vec<Comment>,
    feeds: HashMap<ItemId, HashMap<Uuid, mpsc::UnboundedSender<CommentEvent>>>,
}

#[derive(Debug)]
struct DbViewer {
    name: String,
    avatar: Option<String>,
    pass_hash: String,
}

impl State {
    fn relay_event(&mut self, e: CommentEvent) {
        if let Some(feeds) = self.feeds.get_mut(&e.item_id()) {
            feeds.retain(|_, f| matches!(f.send(e.clone()), Ok(())));
        }
    }

    fn viewer(&self, id: ViewerId) -> Option<Viewer> {
        self.viewers.get(&id).map(|v| Viewer {
            id,
            name: v.name.clone(),
            avatar: v.avatar.clone(),
        })
    }
}

/// Unregisters its feed from the server once the feed stream is dropped
struct FeedGuard {
    state: Arc<Mutex<State>>,
    item: ItemId,
    id: Uuid,
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let hash_map::Entry::Occupied(mut feeds) = state.feeds.entry(self.item) {
            feeds.get_mut().remove(&self.id);
            if feeds.get().is_empty() {
                feeds.remove();
            }
        }
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer::default()
    }

    /// Return the number of feeds currently open on `item`
    pub fn test_num_feeds(&self, item: ItemId) -> usize {
        self.0.lock().feeds.get(&item).map(|f| f.len()).unwrap_or(0)
    }

    pub fn test_num_comments(&self) -> usize {
        self.0.lock().comments.len()
    }

    pub fn test_num_viewers(&self) -> usize {
        self.0.lock().viewers.len()
    }
}

#[async_trait]
impl ItemStore for MockServer {
    async fn get_item(&self, item: ItemId) -> anyhow::Result<Option<Item>> {
        Ok(self.0.lock().items.get(&item).cloned())
    }

    async fn list_items(&self) -> anyhow::Result<Vec<Item>> {
        let mut items = self.0.lock().items.values().cloned().collect::<Vec<_>>();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn create_item(&self, item: Item) -> Result<(), Error> {
        match self.0.lock().items.entry(item.id) {
            hash_map::Entry::Occupied(_) => Err(ApiError::UuidAlreadyUsed(item.id.0).into()),
            hash_map::Entry::Vacant(entry) => {
                entry.insert(item);
                Ok(())
            }
        }
    }

    async fn fetch_voters(&self, item: ItemId) -> anyhow::Result<Option<BTreeSet<ViewerId>>> {
        Ok(self.0.lock().items.get(&item).map(|i| i.voters.clone()))
    }

    async fn write_voters(&self, item: ItemId, voters: BTreeSet<ViewerId>) -> anyhow::Result<bool> {
        match self.0.lock().items.get_mut(&item) {
            Some(i) => {
                i.voters = voters;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn toggle_voter(
        &self,
        item: ItemId,
        viewer: ViewerId,
    ) -> anyhow::Result<Option<BTreeSet<ViewerId>>> {
        let mut state = self.0.lock();
        Ok(state.items.get_mut(&item).map(|i| {
            if !i.voters.remove(&viewer) {
                i.voters.insert(viewer);
            }
            i.voters.clone()
        }))
    }
}

#[async_trait]
impl CommentStore for MockServer {
    async fn list_comments(&self, item: ItemId) -> anyhow::Result<Vec<Comment>> {
        Ok(self
            .0
            .lock()
            .comments
            .iter()
            .rev()
            .filter(|c| c.item_id == item)
            .cloned()
            .collect())
    }

    async fn append_comment(&self, comment: NewComment) -> Result<Comment, Error> {
        let mut state = self.0.lock();
        if !state.items.contains_key(&comment.item_id) {
            return Err(Error::not_found(comment.item_id));
        }
        if state.comments.iter().any(|c| c.id == comment.id) {
            return Err(ApiError::UuidAlreadyUsed(comment.id.0).into());
        }
        // keep timestamps strictly increasing, like a database clock would
        let now = match state.comments.last() {
            Some(last) if last.created_at >= Utc::now() => {
                last.created_at + Duration::microseconds(1)
            }
            _ => Utc::now(),
        };
        let comment = comment.into_comment(now);
        state.comments.push(comment.clone());
        state.relay_event(CommentEvent::Insert(comment.clone()));
        Ok(comment)
    }

    async fn subscribe(&self, item: ItemId) -> anyhow::Result<CommentFeed> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.0
            .lock()
            .feeds
            .entry(item)
            .or_insert_with(HashMap::new)
            .insert(id, sender);
        let guard = FeedGuard {
            state: self.0.clone(),
            item,
            id,
        };
        Ok(Box::pin(futures::stream::unfold(
            (receiver, guard),
            |(mut receiver, guard)| async move {
                let e = receiver.recv().await?;
                Some((Ok(e), (receiver, guard)))
            },
        )))
    }
}

#[async_trait]
impl IdentityProvider for MockServer {
    async fn current_viewer(&self, token: AuthToken) -> anyhow::Result<Option<Viewer>> {
        let state = self.0.lock();
        Ok(state.sessions.get(&token).and_then(|id| state.viewer(*id)))
    }
}

#[async_trait]
impl ViewerDirectory for MockServer {
    async fn create_viewer(&self, v: NewViewer) -> Result<(), Error> {
        v.validate()?;
        let mut state = self.0.lock();
        if state.viewers.values().any(|db| db.name == v.name) {
            return Err(ApiError::NameAlreadyUsed(v.name).into());
        }
        match state.viewers.entry(v.id) {
            btree_map::Entry::Occupied(_) => Err(ApiError::UuidAlreadyUsed(v.id.0).into()),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(DbViewer {
                    name: v.name,
                    avatar: v.avatar,
                    pass_hash: v.initial_password_hash,
                });
                Ok(())
            }
        }
    }

    async fn open_session(&self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        let mut state = self.0.lock();
        let id = state
            .viewers
            .iter()
            .find(|(_, v)| v.name == s.user)
            .map(|(id, v)| (*id, v.pass_hash == s.password));
        match id {
            // tests (of which mock-server is a part of) don't actually use bcrypt
            Some((id, true)) => {
                let tok = AuthToken(Uuid::new_v4());
                state.sessions.insert(tok, id);
                Ok(tok)
            }
            _ => Err(Error::permission_denied()),
        }
    }

    async fn close_session(&self, token: AuthToken) -> Result<(), Error> {
        match self.0.lock().sessions.remove(&token) {
            Some(_) => Ok(()),
            None => Err(Error::permission_denied()),
        }
    }
}
