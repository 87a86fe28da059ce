use chrono::Utc;
use uuid::Uuid;

use crate::{Error, ItemId, Time, ViewerId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub item_id: ItemId,
    pub author_id: ViewerId,
    pub text: String,
    pub created_at: Time,
    pub like_count: i64,
}

/// A comment submission. The id is chosen by the submitter, so that the
/// placeholder it shows locally can be matched with the store's echo.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub id: CommentId,
    pub item_id: ItemId,
    pub author_id: ViewerId,
    pub text: String,
}

impl NewComment {
    pub fn new(item_id: ItemId, author_id: ViewerId, text: String) -> NewComment {
        NewComment {
            id: CommentId(Uuid::new_v4()),
            item_id,
            author_id,
            text,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.text.trim().is_empty() {
            return Err(Error::EmptyComment);
        }
        crate::validate_string(&self.text)
    }

    /// The not-yet-confirmed rendering of this submission
    pub fn placeholder(&self) -> Comment {
        self.clone().into_comment(Utc::now())
    }

    pub fn into_comment(self, created_at: Time) -> Comment {
        Comment {
            id: self.id,
            item_id: self.item_id,
            author_id: self.author_id,
            text: self.text,
            created_at,
            like_count: 0,
        }
    }
}

/// Body of a comment submission over http, the author being the authenticated viewer
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentSubmission {
    pub id: CommentId,
    pub text: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum CommentEvent {
    /// A comment was durably appended; carries the canonical entry
    Insert(Comment),
}

impl CommentEvent {
    pub fn comment(&self) -> &Comment {
        match self {
            CommentEvent::Insert(c) => c,
        }
    }

    pub fn item_id(&self) -> ItemId {
        self.comment().item_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(text: &str) -> NewComment {
        NewComment::new(ItemId::stub(), ViewerId::stub(), String::from(text))
    }

    #[test]
    fn blank_text_is_rejected() {
        assert_eq!(submission("").validate(), Err(Error::EmptyComment));
        assert_eq!(submission(" \n\t ").validate(), Err(Error::EmptyComment));
        assert_eq!(submission(" looks legit ").validate(), Ok(()));
    }

    #[test]
    fn placeholder_shares_the_submission_id() {
        let s = submission("first!");
        let p = s.placeholder();
        assert_eq!(p.id, s.id);
        assert_eq!(p.text, "first!");
        assert_eq!(p.like_count, 0);
    }
}
