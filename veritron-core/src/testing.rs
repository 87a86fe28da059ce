//! Minimal in-memory stores for the unit tests of this crate

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::channel::mpsc;

use crate::{
    api::{self, Comment, CommentEvent, Item, ItemId, NewComment, Time, ViewerId},
    CommentFeed, CommentStore, Error, ItemStore,
};

type FeedSender = mpsc::UnboundedSender<anyhow::Result<CommentEvent>>;

/// Stores with call counters, whose vote toggle is the provided
/// read-then-write one
#[derive(Default)]
pub struct MemStore {
    items: Mutex<HashMap<ItemId, Item>>,
    comments: Mutex<Vec<Comment>>,
    feeds: Mutex<Vec<(ItemId, FeedSender)>>,
    pub calls: AtomicUsize,
}

pub fn item(id: ItemId) -> Item {
    api::NewItem {
        id,
        title: Some(String::from("Moon made of cheese")),
        url: None,
        is_fake: true,
        fake_percentage: 99,
        real_percentage: 1,
        reasons: String::from("No cheese was found by any mission"),
        subject_expertise: Some(String::from("Science/Astronomy")),
        author_verified: false,
        related_links: Default::default(),
        cross_check_sources: Default::default(),
    }
    .into_item(Utc::now())
}

pub fn comment_at(item_id: ItemId, text: &str, created_at: Time) -> Comment {
    NewComment::new(item_id, ViewerId(api::Uuid::new_v4()), String::from(text))
        .into_comment(created_at)
}

impl MemStore {
    pub fn with_item(id: ItemId) -> MemStore {
        let store = MemStore::default();
        store.items.lock().unwrap().insert(id, item(id));
        store
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn num_comments(&self) -> usize {
        self.comments.lock().unwrap().len()
    }

    /// Number of feeds whose receiving end is still alive
    pub fn live_feeds(&self) -> usize {
        let mut feeds = self.feeds.lock().unwrap();
        feeds.retain(|(_, f)| !f.is_closed());
        feeds.len()
    }

    pub fn break_feeds(&self) {
        for (_, f) in self.feeds.lock().unwrap().iter() {
            let _ = f.unbounded_send(Err(anyhow!("feed connection reset")));
        }
    }

    pub fn end_feeds(&self) {
        self.feeds.lock().unwrap().clear();
    }

    /// Pushes an event on the feeds of `item` without storing anything
    pub fn push_event(&self, item: ItemId, comment: Comment) {
        for (i, f) in self.feeds.lock().unwrap().iter() {
            if *i == item {
                let _ = f.unbounded_send(Ok(CommentEvent::Insert(comment.clone())));
            }
        }
    }
}

#[async_trait]
impl ItemStore for MemStore {
    async fn get_item(&self, item: ItemId) -> anyhow::Result<Option<Item>> {
        self.count();
        Ok(self.items.lock().unwrap().get(&item).cloned())
    }

    async fn list_items(&self) -> anyhow::Result<Vec<Item>> {
        self.count();
        Ok(self.items.lock().unwrap().values().cloned().collect())
    }

    async fn create_item(&self, item: Item) -> Result<(), Error> {
        self.count();
        self.items.lock().unwrap().insert(item.id, item);
        Ok(())
    }

    async fn fetch_voters(&self, item: ItemId) -> anyhow::Result<Option<BTreeSet<ViewerId>>> {
        self.count();
        let voters = self.items.lock().unwrap().get(&item).map(|i| i.voters.clone());
        // let concurrent toggles interleave between the read and the write
        tokio::task::yield_now().await;
        Ok(voters)
    }

    async fn write_voters(&self, item: ItemId, voters: BTreeSet<ViewerId>) -> anyhow::Result<bool> {
        self.count();
        match self.items.lock().unwrap().get_mut(&item) {
            Some(i) => {
                i.voters = voters;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CommentStore for MemStore {
    async fn list_comments(&self, item: ItemId) -> anyhow::Result<Vec<Comment>> {
        self.count();
        let mut res = self
            .comments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.item_id == item)
            .cloned()
            .collect::<Vec<_>>();
        res.reverse();
        Ok(res)
    }

    async fn append_comment(&self, comment: NewComment) -> Result<Comment, Error> {
        self.count();
        let comment = {
            let mut comments = self.comments.lock().unwrap();
            let now = match comments.last() {
                Some(last) if last.created_at >= Utc::now() => {
                    last.created_at + Duration::milliseconds(1)
                }
                _ => Utc::now(),
            };
            let comment = comment.into_comment(now);
            comments.push(comment.clone());
            comment
        };
        self.push_event(comment.item_id, comment.clone());
        Ok(comment)
    }

    async fn subscribe(&self, item: ItemId) -> anyhow::Result<CommentFeed> {
        self.count();
        let (sender, receiver) = mpsc::unbounded();
        self.feeds.lock().unwrap().push((item, sender));
        Ok(Box::pin(receiver))
    }
}
