use std::sync::Arc;

use anyhow::Context;

use crate::{
    api::{ItemId, VoteTally, ViewerId},
    Error, ItemStore,
};

/// Applies vote toggles against the item store. Votes are not pushed to
/// anyone, readers pull the tally again.
#[derive(Clone)]
pub struct VoteLedger {
    items: Arc<dyn ItemStore>,
}

impl VoteLedger {
    pub fn new(items: Arc<dyn ItemStore>) -> VoteLedger {
        VoteLedger { items }
    }

    /// Callers only get the new tally once the store accepted the write, and
    /// should keep displaying the previous one until then.
    pub async fn toggle(&self, item: ItemId, viewer: ViewerId) -> Result<VoteTally, Error> {
        let voters = self
            .items
            .toggle_voter(item, viewer)
            .await
            .with_context(|| format!("toggling vote of {viewer:?} on {item:?}"))?
            .ok_or_else(|| Error::not_found(item))?;
        tracing::debug!(?item, ?viewer, vote_count = voters.len(), "toggled vote");
        Ok(VoteTally::from(voters))
    }

    pub async fn tally(&self, item: ItemId) -> Result<VoteTally, Error> {
        let voters = self
            .items
            .fetch_voters(item)
            .await
            .with_context(|| format!("fetching voters of {item:?}"))?
            .ok_or_else(|| Error::not_found(item))?;
        Ok(VoteTally::from(voters))
    }
}
