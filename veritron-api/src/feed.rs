use crate::{Comment, CommentEvent};

/// Messages sent by the server over a comment feed websocket
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    /// Current comments of the item, newest first, sent once on connection
    Snapshot(Vec<Comment>),
    Comment(CommentEvent),
}
