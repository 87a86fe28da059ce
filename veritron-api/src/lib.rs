use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod comment;
pub use comment::{Comment, CommentEvent, CommentId, CommentSubmission, NewComment};

mod error;
pub use error::Error;

mod feed;
pub use feed::FeedMessage;

mod item;
pub use item::{Item, ItemId, NewItem, Severity, VoteTally, DEFAULT_ITEM_TITLE};

pub mod list;
pub use list::StringList;

mod viewer;
pub use viewer::{AuthToken, NewSession, NewViewer, Viewer, ViewerId};

/// Postgres refuses null bytes in text, so reject them before they reach any store
pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_bytes_are_rejected() {
        assert_eq!(validate_string("plain text"), Ok(()));
        assert_eq!(
            validate_string("bad\0text"),
            Err(Error::NullByteInString(String::from("bad\0text")))
        );
    }
}
