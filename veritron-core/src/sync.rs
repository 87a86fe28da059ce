use std::{collections::HashSet, sync::Arc};

use anyhow::Context;
use futures::StreamExt;

use crate::{
    api::{Comment, CommentEvent, CommentId, ItemId, NewComment},
    CommentFeed, CommentStore, Error,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Applied {
    Inserted,
    /// An entry with the same id was already displayed and got overwritten
    Replaced,
    Ignored,
}

/// Comments of one item as presented to one viewer, newest first, with at most
/// one entry per comment id
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommentView {
    comments: Vec<Comment>,
    /// Ids of locally submitted comments whose canonical echo did not arrive yet
    pending: HashSet<CommentId>,
}

impl CommentView {
    pub fn from_snapshot(mut comments: Vec<Comment>) -> CommentView {
        comments.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        let mut seen = HashSet::new();
        comments.retain(|c| seen.insert(c.id));
        CommentView {
            comments,
            pending: HashSet::new(),
        }
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn get(&self, id: CommentId) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }

    pub fn is_pending(&self, id: CommentId) -> bool {
        self.pending.contains(&id)
    }

    /// Merges a feed event. A comment already confirmed is overwritten where it
    /// stands. A placeholder is dropped and its canonical echo goes to the head,
    /// as does any comment not displayed yet.
    pub fn apply(&mut self, event: CommentEvent) -> Applied {
        match event {
            CommentEvent::Insert(comment) => {
                let was_pending = self.pending.remove(&comment.id);
                match self.comments.iter().position(|c| c.id == comment.id) {
                    Some(idx) if was_pending => {
                        // live comments may have been pushed ahead of the placeholder
                        self.comments.remove(idx);
                        self.comments.insert(0, comment);
                        Applied::Replaced
                    }
                    Some(idx) => {
                        self.comments[idx] = comment;
                        Applied::Replaced
                    }
                    None => {
                        self.comments.insert(0, comment);
                        Applied::Inserted
                    }
                }
            }
        }
    }

    /// Displays a local submission until its canonical version comes through
    /// the feed. Does nothing if the echo already won the race.
    pub fn show_placeholder(&mut self, placeholder: Comment) -> Applied {
        if self.get(placeholder.id).is_some() {
            return Applied::Ignored;
        }
        self.pending.insert(placeholder.id);
        self.comments.insert(0, placeholder);
        Applied::Inserted
    }

    /// Removes a placeholder whose submission failed. Confirmed comments stay.
    pub fn retract_placeholder(&mut self, id: CommentId) -> bool {
        if !self.pending.remove(&id) {
            return false;
        }
        self.comments.retain(|c| c.id != id);
        true
    }

    /// Puts back a placeholder that predates the current snapshot, at the place
    /// its timestamp gives it
    fn restore_placeholder(&mut self, placeholder: Comment) {
        if self.get(placeholder.id).is_some() {
            return;
        }
        let idx = self
            .comments
            .iter()
            .position(|c| c.created_at < placeholder.created_at)
            .unwrap_or(self.comments.len());
        self.pending.insert(placeholder.id);
        self.comments.insert(idx, placeholder);
    }

    fn placeholders(&self) -> Vec<Comment> {
        self.comments
            .iter()
            .filter(|c| self.pending.contains(&c.id))
            .cloned()
            .collect()
    }
}

/// One viewer observing the comments of one item.
///
/// Dropping it, on whatever path, releases the underlying feed.
pub struct Subscription {
    item: ItemId,
    store: Arc<dyn CommentStore>,
    view: CommentView,
    feed: Option<CommentFeed>,
}

impl Subscription {
    async fn open(store: Arc<dyn CommentStore>, item: ItemId) -> Result<Subscription, Error> {
        // open the feed before reading the snapshot, so that no comment appended
        // in between gets lost; comments seen twice collapse by id
        let feed = store
            .subscribe(item)
            .await
            .with_context(|| format!("opening comment feed for {item:?}"))?;
        let snapshot = store
            .list_comments(item)
            .await
            .with_context(|| format!("listing comments of {item:?}"))?;
        tracing::debug!(?item, num_comments = snapshot.len(), "opened comment subscription");
        Ok(Subscription {
            item,
            store,
            view: CommentView::from_snapshot(snapshot),
            feed: Some(feed),
        })
    }

    pub fn item(&self) -> ItemId {
        self.item
    }

    pub fn view(&self) -> &CommentView {
        &self.view
    }

    pub fn is_live(&self) -> bool {
        self.feed.is_some()
    }

    pub fn show_placeholder(&mut self, placeholder: Comment) -> Applied {
        self.view.show_placeholder(placeholder)
    }

    pub fn retract_placeholder(&mut self, id: CommentId) -> bool {
        self.view.retract_placeholder(id)
    }

    /// Waits for the next feed event and merges it into the view.
    ///
    /// Returns `None` once the feed ended. A feed error is returned once and
    /// terminates the subscription, after which `resubscribe` can restart it.
    pub async fn next(&mut self) -> Option<Result<CommentEvent, Error>> {
        loop {
            let msg = self.feed.as_mut()?.next().await;
            match msg {
                None => {
                    tracing::debug!(item = ?self.item, "comment feed ended");
                    self.feed = None;
                    return None;
                }
                Some(Err(err)) => {
                    self.feed = None;
                    return Some(Err(Error::Store(
                        err.context(format!("receiving comment feed for {:?}", self.item)),
                    )));
                }
                Some(Ok(event)) if event.item_id() != self.item => {
                    tracing::warn!(
                        item = ?self.item,
                        other = ?event.item_id(),
                        "comment feed delivered an event for another item"
                    );
                }
                Some(Ok(event)) => {
                    self.view.apply(event.clone());
                    return Some(Ok(event));
                }
            }
        }
    }

    /// Restarts the feed and refreshes the snapshot, keeping the placeholders
    /// that are still unconfirmed
    pub async fn resubscribe(&mut self) -> Result<(), Error> {
        self.feed = None;
        let placeholders = self.view.placeholders();
        *self = Subscription::open(self.store.clone(), self.item).await?;
        for p in placeholders {
            self.view.restore_placeholder(p);
        }
        Ok(())
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.feed.is_some() {
            tracing::debug!(item = ?self.item, "released comment subscription");
        }
    }
}

/// Entry point to the live comment threads of items
#[derive(Clone)]
pub struct Synchronizer {
    comments: Arc<dyn CommentStore>,
}

impl Synchronizer {
    pub fn new(comments: Arc<dyn CommentStore>) -> Synchronizer {
        Synchronizer { comments }
    }

    pub async fn subscribe(&self, item: ItemId) -> Result<Subscription, Error> {
        Subscription::open(self.comments.clone(), item).await
    }

    /// Snapshot of the comments of `item`, newest first
    pub async fn list(&self, item: ItemId) -> Result<Vec<Comment>, Error> {
        let comments = self
            .comments
            .list_comments(item)
            .await
            .with_context(|| format!("listing comments of {item:?}"))?;
        Ok(CommentView::from_snapshot(comments).comments)
    }

    /// Appends a comment. It becomes visible to subscribers, its author
    /// included, only through the feed.
    pub async fn submit(&self, comment: NewComment) -> Result<Comment, Error> {
        comment.validate()?;
        let comment = self.comments.append_comment(comment).await?;
        tracing::debug!(item = ?comment.item_id, comment = ?comment.id, "appended comment");
        Ok(comment)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        api::{self, Uuid, ViewerId},
        testing::{comment_at, MemStore},
    };

    fn at(secs: i64) -> api::Time {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn texts(view: &CommentView) -> Vec<&str> {
        view.comments().iter().map(|c| &c.text as &str).collect()
    }

    fn assert_well_formed(view: &CommentView) {
        let unique = view.comments().iter().map(|c| c.id).collect::<HashSet<_>>();
        assert_eq!(unique.len(), view.len(), "duplicate ids in {view:?}");
        for w in view.comments().windows(2) {
            assert!(w[0].created_at >= w[1].created_at, "not newest-first: {view:?}");
        }
    }

    #[test]
    fn snapshot_is_sorted_and_deduplicated() {
        let item = ItemId::stub();
        let a = comment_at(item, "a", at(1));
        let b = comment_at(item, "b", at(3));
        let c = comment_at(item, "c", at(2));
        let view = CommentView::from_snapshot(vec![a.clone(), b.clone(), c.clone(), a.clone()]);
        assert_eq!(texts(&view), vec!["b", "c", "a"]);
        assert_well_formed(&view);
    }

    #[test]
    fn echo_replaces_its_placeholder() {
        let item = ItemId::stub();
        let old = comment_at(item, "old", at(0));
        let mut view = CommentView::from_snapshot(vec![old]);

        let submission = api::NewComment::new(item, ViewerId::stub(), String::from("mine"));
        assert_eq!(view.show_placeholder(submission.placeholder()), Applied::Inserted);
        assert!(view.is_pending(submission.id));

        let mut canonical = submission.clone().into_comment(at(5));
        canonical.like_count = 3;
        assert_eq!(
            view.apply(CommentEvent::Insert(canonical.clone())),
            Applied::Replaced
        );
        assert_eq!(texts(&view), vec!["mine", "old"]);
        assert_eq!(view.get(submission.id), Some(&canonical));
        assert!(!view.is_pending(submission.id));
        assert!(!view.retract_placeholder(submission.id));
    }

    #[test]
    fn echo_before_placeholder_wins() {
        let item = ItemId::stub();
        let submission = api::NewComment::new(item, ViewerId::stub(), String::from("fast"));
        let canonical = submission.clone().into_comment(at(5));
        let mut view = CommentView::default();
        view.apply(CommentEvent::Insert(canonical.clone()));
        assert_eq!(view.show_placeholder(submission.placeholder()), Applied::Ignored);
        assert_eq!(view.comments(), &[canonical]);
    }

    #[test]
    fn failed_submission_placeholder_is_retracted() {
        let item = ItemId::stub();
        let old = comment_at(item, "old", at(0));
        let mut view = CommentView::from_snapshot(vec![old.clone()]);
        let submission = api::NewComment::new(item, ViewerId::stub(), String::from("oops"));
        view.show_placeholder(submission.placeholder());
        assert!(view.retract_placeholder(submission.id));
        assert_eq!(view.comments(), &[old.clone()]);
        // confirmed comments are never retracted
        assert!(!view.retract_placeholder(old.id));
    }

    #[test]
    fn echo_moves_ahead_of_comments_pushed_meanwhile() {
        let item = ItemId::stub();
        let mut view = CommentView::default();
        let bob = api::NewComment::new(item, ViewerId::stub(), String::from("bob"));
        view.show_placeholder(bob.clone().into_comment(at(9)));
        view.apply(CommentEvent::Insert(comment_at(item, "carol", at(10))));
        assert_eq!(
            view.apply(CommentEvent::Insert(bob.clone().into_comment(at(11)))),
            Applied::Replaced
        );
        assert_eq!(texts(&view), vec!["bob", "carol"]);
        assert!(!view.is_pending(bob.id));
        assert_well_formed(&view);
    }

    #[test]
    fn merging_in_feed_order_keeps_the_invariants() {
        let item = ItemId::stub();
        bolero::check!()
            .with_type::<(Vec<i8>, Vec<(u8, u8)>)>()
            .for_each(|(snapshot, ops)| {
                let snapshot = snapshot
                    .iter()
                    .map(|s| comment_at(item, "snap", at(*s as i64)))
                    .collect::<Vec<_>>();
                let mut view = CommentView::from_snapshot(snapshot.clone());
                assert_well_formed(&view);

                // feed events come after the snapshot, possibly redelivering known
                // comments, interleaved with local submissions awaiting their echo
                let mut confirmed = snapshot;
                let mut submitted = Vec::new();
                let mut t = 1_000;
                for (op, pick) in ops {
                    let comment = match op % 4 {
                        0 => {
                            // placeholders are stamped before their submission commits
                            let s = api::NewComment::new(
                                item,
                                ViewerId::stub(),
                                String::from("mine"),
                            );
                            let applied = view.show_placeholder(s.clone().into_comment(at(t)));
                            assert_eq!(applied, Applied::Inserted);
                            assert!(view.is_pending(s.id));
                            submitted.push(s);
                            assert_well_formed(&view);
                            continue;
                        }
                        1 if !submitted.is_empty() => {
                            let s = submitted.remove(*pick as usize % submitted.len());
                            t += 1 + *pick as i64;
                            s.into_comment(at(t))
                        }
                        2 if !confirmed.is_empty() => {
                            confirmed[*pick as usize % confirmed.len()].clone()
                        }
                        _ => {
                            t += 1 + *pick as i64;
                            comment_at(item, "live", at(t))
                        }
                    };
                    let redelivered = confirmed.iter().any(|c| c.id == comment.id);
                    let was_there = view.get(comment.id).is_some();
                    let applied = view.apply(CommentEvent::Insert(comment.clone()));
                    match was_there {
                        true => assert_eq!(applied, Applied::Replaced),
                        false => assert_eq!(applied, Applied::Inserted),
                    }
                    if !redelivered {
                        assert_eq!(view.comments()[0], comment);
                        confirmed.push(comment.clone());
                    }
                    assert!(!view.is_pending(comment.id));
                    assert_eq!(view.get(comment.id), Some(&comment));
                    assert_well_formed(&view);
                }
            });
    }

    #[tokio::test]
    async fn two_viewers_see_each_submission_once() {
        let item = ItemId(Uuid::new_v4());
        let store = Arc::new(MemStore::with_item(item));
        let sync = Synchronizer::new(store.clone());

        let mut submitter = sync.subscribe(item).await.unwrap();
        let mut other = sync.subscribe(item).await.unwrap();

        let foo = api::NewComment::new(item, ViewerId(Uuid::new_v4()), String::from("foo"));
        submitter.show_placeholder(foo.placeholder());
        sync.submit(foo.clone()).await.unwrap();
        let bar = api::NewComment::new(item, ViewerId(Uuid::new_v4()), String::from("bar"));
        sync.submit(bar).await.unwrap();

        for sub in [&mut submitter, &mut other] {
            sub.next().await.unwrap().unwrap();
            sub.next().await.unwrap().unwrap();
            assert_eq!(texts(sub.view()), vec!["bar", "foo"]);
            assert_well_formed(sub.view());
            assert!(!sub.view().is_pending(foo.id));
        }
    }

    #[tokio::test]
    async fn comment_appended_while_opening_is_not_lost() {
        let item = ItemId(Uuid::new_v4());
        let store = Arc::new(MemStore::with_item(item));
        let sync = Synchronizer::new(store.clone());
        let c = sync
            .submit(api::NewComment::new(item, ViewerId::stub(), String::from("early")))
            .await
            .unwrap();
        let mut sub = sync.subscribe(item).await.unwrap();
        // the feed redelivers what the snapshot already had
        store.push_event(item, c.clone());
        assert!(sub.next().await.unwrap().is_ok());
        assert_eq!(sub.view().comments(), &[c]);
    }

    #[tokio::test]
    async fn events_for_other_items_are_skipped() {
        let item = ItemId(Uuid::new_v4());
        let store = Arc::new(MemStore::with_item(item));
        let sync = Synchronizer::new(store.clone());
        let mut sub = sync.subscribe(item).await.unwrap();
        store.push_event(item, comment_at(ItemId::stub(), "elsewhere", Utc::now()));
        store.push_event(item, comment_at(item, "here", Utc::now()));
        sub.next().await.unwrap().unwrap();
        assert_eq!(texts(sub.view()), vec!["here"]);
    }

    #[tokio::test]
    async fn empty_text_never_reaches_the_store() {
        let item = ItemId(Uuid::new_v4());
        let store = Arc::new(MemStore::with_item(item));
        let sync = Synchronizer::new(store.clone());
        let err = sync
            .submit(api::NewComment::new(item, ViewerId::stub(), String::from("   ")))
            .await
            .unwrap_err();
        assert_eq!(err.api(), Some(&api::Error::EmptyComment));
        assert_eq!(store.calls(), 0);
        assert_eq!(store.num_comments(), 0);
    }

    #[tokio::test]
    async fn feed_error_terminates_then_resubscribe_restarts() {
        let item = ItemId(Uuid::new_v4());
        let store = Arc::new(MemStore::with_item(item));
        let sync = Synchronizer::new(store.clone());
        let mut sub = sync.subscribe(item).await.unwrap();
        let pending = api::NewComment::new(item, ViewerId::stub(), String::from("pending"));
        sub.show_placeholder(pending.placeholder());

        store.break_feeds();
        assert!(sub.next().await.unwrap().unwrap_err().is_store());
        assert!(!sub.is_live());
        assert!(sub.next().await.is_none());

        sync.submit(api::NewComment::new(item, ViewerId::stub(), String::from("missed")))
            .await
            .unwrap();
        sub.resubscribe().await.unwrap();
        assert!(sub.is_live());
        assert_eq!(texts(sub.view()), vec!["missed", "pending"]);
        assert!(sub.view().is_pending(pending.id));
        assert_well_formed(sub.view());
    }

    #[tokio::test]
    async fn feed_end_is_reported_once() {
        let item = ItemId(Uuid::new_v4());
        let store = Arc::new(MemStore::with_item(item));
        let mut sub = Synchronizer::new(store.clone()).subscribe(item).await.unwrap();
        store.end_feeds();
        assert!(sub.next().await.is_none());
        assert!(!sub.is_live());
    }

    #[tokio::test]
    async fn unsubscribe_releases_only_its_own_feed() {
        let item = ItemId(Uuid::new_v4());
        let store = Arc::new(MemStore::with_item(item));
        let sync = Synchronizer::new(store.clone());
        let first = sync.subscribe(item).await.unwrap();
        let mut second = sync.subscribe(item).await.unwrap();
        assert_eq!(store.live_feeds(), 2);

        first.unsubscribe();
        assert_eq!(store.live_feeds(), 1);

        // abrupt teardown, eg. a panicking view, releases as well
        let third = AssertUnwindSafe(sync.subscribe(item).await.unwrap());
        assert_eq!(store.live_feeds(), 2);
        let _ = std::panic::catch_unwind(move || {
            let _third = third;
            panic!("view torn down");
        });
        assert_eq!(store.live_feeds(), 1);

        sync.submit(api::NewComment::new(item, ViewerId::stub(), String::from("still here")))
            .await
            .unwrap();
        second.next().await.unwrap().unwrap();
        assert_eq!(texts(second.view()), vec!["still here"]);
    }
}
