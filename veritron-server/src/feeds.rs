use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use futures::channel::mpsc;
use parking_lot::RwLock;
use veritron_api::{CommentEvent, CommentId, ItemId, Uuid};
use veritron_core::CommentFeed;

use crate::db;

pub const COMMENT_CHANNEL: &str = "comment_inserted";

type FeedSender = mpsc::UnboundedSender<anyhow::Result<CommentEvent>>;

/// Open comment feeds, by item they observe
#[derive(Clone, Debug, Default)]
pub struct ItemFeeds(Arc<RwLock<HashMap<ItemId, HashMap<Uuid, FeedSender>>>>);

/// Unregisters its feed once the feed stream is dropped
struct FeedGuard {
    feeds: ItemFeeds,
    item: ItemId,
    id: Uuid,
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.feeds.remove(self.item, self.id);
    }
}

impl ItemFeeds {
    pub fn new() -> ItemFeeds {
        ItemFeeds::default()
    }

    pub fn open(&self, item: ItemId) -> CommentFeed {
        // Note: this must stay unbounded, relaying happens with the lock held
        let (sender, receiver) = mpsc::unbounded();
        let id = Uuid::new_v4();
        self.0
            .write()
            .entry(item)
            .or_insert_with(HashMap::new)
            .insert(id, sender);
        let guard = FeedGuard {
            feeds: self.clone(),
            item,
            id,
        };
        Box::pin(futures::stream::unfold(
            (receiver, guard),
            |(mut receiver, guard)| async move {
                let e = futures::StreamExt::next(&mut receiver).await?;
                Some((e, (receiver, guard)))
            },
        ))
    }

    fn remove(&self, item: ItemId, id: Uuid) {
        let mut feeds = self.0.write();
        if let Some(socks) = feeds.get_mut(&item) {
            socks.remove(&id);
            if socks.is_empty() {
                feeds.remove(&item);
            }
        }
        tracing::debug!(?item, feed = ?id, "closed comment feed");
    }

    #[cfg(test)]
    pub fn num_feeds(&self, item: ItemId) -> usize {
        self.0.read().get(&item).map(|f| f.len()).unwrap_or(0)
    }

    pub fn relay(&self, e: CommentEvent) {
        let item = e.item_id();
        if let Some(socks) = self.0.write().get_mut(&item) {
            socks.retain(|_, s| s.unbounded_send(Ok(e.clone())).is_ok());
        }
    }

    /// Terminates every open feed, whose subscribers then need to resubscribe
    /// to catch up on what they missed
    pub fn fail_all(&self, reason: &str) {
        let mut feeds = self.0.write();
        for s in feeds.values().flat_map(|f| f.values()) {
            let _ = s.unbounded_send(Err(anyhow!("comment feed interrupted: {reason}")));
        }
        feeds.clear();
    }
}

/// Relays the comments announced by the database to the open feeds. Returns
/// once the listener is set up, with the handle of the relaying task.
pub async fn spawn_comment_listener(
    pool: sqlx::PgPool,
    feeds: ItemFeeds,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let mut listener = sqlx::postgres::PgListener::connect_with(&pool)
        .await
        .context("connecting comment listener")?;
    listener
        .listen(COMMENT_CHANNEL)
        .await
        .with_context(|| format!("listening on {COMMENT_CHANNEL}"))?;
    Ok(tokio::spawn(async move {
        loop {
            match listener.recv().await {
                Ok(notif) => {
                    if let Err(err) = relay_notification(&pool, &feeds, notif.payload()).await {
                        tracing::error!(?err, "failed relaying comment notification");
                        feeds.fail_all("failed relaying a comment");
                    }
                }
                Err(err) => {
                    // the listener reconnects on the next recv, notifications sent
                    // in-between are lost
                    tracing::error!(?err, "comment listener lost its connection");
                    feeds.fail_all("lost the database connection");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }))
}

async fn relay_notification(
    pool: &sqlx::PgPool,
    feeds: &ItemFeeds,
    payload: &str,
) -> anyhow::Result<()> {
    let id = CommentId(
        Uuid::try_from(payload).with_context(|| format!("parsing notification {payload:?}"))?,
    );
    let mut conn = pool.acquire().await.context("acquiring db connection")?;
    let comment = db::fetch_comment(&mut *conn, id)
        .await?
        .ok_or_else(|| anyhow!("notified comment {id:?} does not exist"))?;
    feeds.relay(CommentEvent::Insert(comment));
    Ok(())
}
