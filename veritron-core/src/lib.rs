mod error;
pub use error::Error;

mod gate;
pub use gate::ActionGate;

mod ledger;
pub use ledger::VoteLedger;

mod service;
pub use service::Service;

mod store;
pub use store::{CommentFeed, CommentStore, IdentityProvider, ItemStore, ViewerDirectory};

mod sync;
pub use sync::{Applied, CommentView, Subscription, Synchronizer};

#[cfg(test)]
mod testing;

pub mod api {
    pub use veritron_api::*;
}
