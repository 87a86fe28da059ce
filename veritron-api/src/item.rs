use std::collections::BTreeSet;

use uuid::Uuid;

use crate::{Error, StringList, Time, ViewerId, STUB_UUID};

pub const DEFAULT_ITEM_TITLE: &str = "News Verification Report";

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn stub() -> ItemId {
        ItemId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Item {
    pub id: ItemId,
    pub created_at: Time,

    pub title: String,
    pub url: Option<String>,

    pub is_fake: bool,
    pub fake_percentage: u8,
    pub real_percentage: u8,
    /// Verification analysis backing the verdict
    pub reasons: String,
    /// `/`-separated category path, eg. "Health/Vaccines"
    pub subject_expertise: Option<String>,
    pub author_verified: bool,

    pub related_links: Vec<String>,
    pub cross_check_sources: Vec<String>,

    /// Viewers who upvoted this item, membership is the vote
    pub voters: BTreeSet<ViewerId>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Item {
    pub fn vote_count(&self) -> usize {
        self.voters.len()
    }

    pub fn has_voted(&self, viewer: &ViewerId) -> bool {
        self.voters.contains(viewer)
    }

    pub fn tally(&self) -> VoteTally {
        VoteTally::from(self.voters.clone())
    }

    pub fn severity(&self) -> Severity {
        match self.fake_percentage {
            70.. => Severity::High,
            30.. => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub fn category(&self) -> &str {
        self.subject_expertise
            .as_deref()
            .and_then(|s| s.split('/').next())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("Unknown")
    }

    /// The percentage backing the verdict that is displayed
    pub fn verdict_percentage(&self) -> u8 {
        match self.is_fake {
            true => self.fake_percentage,
            false => self.real_percentage,
        }
    }
}

/// Result of a vote toggle: the voter set as written, and its size
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VoteTally {
    pub voters: BTreeSet<ViewerId>,
    pub vote_count: usize,
}

impl From<BTreeSet<ViewerId>> for VoteTally {
    fn from(voters: BTreeSet<ViewerId>) -> VoteTally {
        VoteTally {
            vote_count: voters.len(),
            voters,
        }
    }
}

/// An analysed news item as handed over by the analysis pipeline
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewItem {
    pub id: ItemId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub is_fake: bool,
    pub fake_percentage: u8,
    pub real_percentage: u8,
    #[serde(default)]
    pub reasons: String,
    #[serde(default)]
    pub subject_expertise: Option<String>,
    #[serde(default)]
    pub author_verified: bool,
    #[serde(default)]
    pub related_links: StringList,
    #[serde(default)]
    pub cross_check_sources: StringList,
}

impl NewItem {
    pub fn validate(&self) -> Result<(), Error> {
        for s in [&self.title, &self.url, &self.subject_expertise]
            .into_iter()
            .flatten()
        {
            crate::validate_string(s)?;
        }
        crate::validate_string(&self.reasons)?;
        for s in self.related_links.0.iter().chain(self.cross_check_sources.0.iter()) {
            crate::validate_string(s)?;
        }
        Ok(())
    }

    /// Builds the stored item, with no voter yet
    pub fn into_item(self, created_at: Time) -> Item {
        Item {
            id: self.id,
            created_at,
            title: self
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| String::from(DEFAULT_ITEM_TITLE)),
            url: self.url,
            is_fake: self.is_fake,
            fake_percentage: self.fake_percentage.min(100),
            real_percentage: self.real_percentage.min(100),
            reasons: self.reasons,
            subject_expertise: self.subject_expertise,
            author_verified: self.author_verified,
            related_links: self.related_links.into_vec(),
            cross_check_sources: self.cross_check_sources.into_vec(),
            voters: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn new_item(json: serde_json::Value) -> NewItem {
        serde_json::from_value(json).expect("parsing new item")
    }

    fn item(fake_percentage: u8, subject_expertise: Option<&str>) -> Item {
        NewItem {
            id: ItemId::stub(),
            title: None,
            url: None,
            is_fake: fake_percentage >= 50,
            fake_percentage,
            real_percentage: 100 - fake_percentage,
            reasons: String::new(),
            subject_expertise: subject_expertise.map(String::from),
            author_verified: false,
            related_links: StringList::default(),
            cross_check_sources: StringList::default(),
        }
        .into_item(Utc::now())
    }

    #[test]
    fn severity_thresholds() {
        assert_eq!(item(0, None).severity(), Severity::Low);
        assert_eq!(item(29, None).severity(), Severity::Low);
        assert_eq!(item(30, None).severity(), Severity::Medium);
        assert_eq!(item(69, None).severity(), Severity::Medium);
        assert_eq!(item(70, None).severity(), Severity::High);
        assert_eq!(item(100, None).severity(), Severity::High);
    }

    #[test]
    fn category_is_first_path_segment() {
        assert_eq!(item(0, Some("Health/Vaccines")).category(), "Health");
        assert_eq!(item(0, Some("Politics")).category(), "Politics");
        assert_eq!(item(0, Some("")).category(), "Unknown");
        assert_eq!(item(0, None).category(), "Unknown");
    }

    #[test]
    fn verdict_follows_fakeness() {
        let fake = item(80, None);
        assert_eq!(fake.verdict_percentage(), 80);
        let real = item(10, None);
        assert_eq!(real.verdict_percentage(), 90);
    }

    #[test]
    fn ingestion_normalizes_loose_fields() {
        let n = new_item(serde_json::json!({
            "id": STUB_UUID,
            "is_fake": true,
            "fake_percentage": 120,
            "real_percentage": 0,
            "related_links": "[\"https://a.example\", \"https://b.example\"]",
            "cross_check_sources": "Reuters, AP News",
        }));
        assert_eq!(n.validate(), Ok(()));
        let i = n.into_item(Utc::now());
        assert_eq!(i.title, DEFAULT_ITEM_TITLE);
        assert_eq!(i.fake_percentage, 100);
        assert_eq!(i.related_links, vec!["https://a.example", "https://b.example"]);
        assert_eq!(i.cross_check_sources, vec!["Reuters", "AP News"]);
        assert_eq!(i.tally(), VoteTally::default());
    }

    #[test]
    fn ingestion_rejects_null_bytes() {
        let n = new_item(serde_json::json!({
            "id": STUB_UUID,
            "is_fake": false,
            "fake_percentage": 5,
            "real_percentage": 95,
            "related_links": ["https://a.example/\u{0}"],
        }));
        assert!(matches!(n.validate(), Err(Error::NullByteInString(_))));
    }
}
