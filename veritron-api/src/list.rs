//! Normalization of list-valued fields that storage hands back loosely typed.
//!
//! Depending on who wrote the row, a field such as `related_links` may hold a
//! structured list, a JSON-encoded list inside a string, or a raw comma or
//! newline separated string. [`StringList`] accepts all of these when
//! deserializing and only ever exposes the canonical `Vec<String>`.

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct StringList(pub Vec<String>);

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RawList {
    List(Vec<Option<String>>),
    Text(String),
}

impl StringList {
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn from_text(text: &str) -> StringList {
        let trimmed = text.trim();
        if trimmed.starts_with('[') {
            if let Ok(list) = serde_json::from_str::<Vec<Option<String>>>(trimmed) {
                return StringList::from_entries(list.into_iter().flatten());
            }
        }
        StringList::from_entries(trimmed.split(|c| c == ',' || c == '\n').map(String::from))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = String>) -> StringList {
        StringList(
            entries
                .into_iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        )
    }

    /// Normalize a raw JSON value, as read from a `json`/`jsonb` column
    pub fn from_json(value: serde_json::Value) -> anyhow::Result<StringList> {
        Ok(serde_json::from_value(value)?)
    }
}

impl<'de> serde::Deserialize<'de> for StringList {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<StringList, D::Error> {
        Ok(match Option::<RawList>::deserialize(deserializer)? {
            None => StringList::default(),
            Some(RawList::List(list)) => StringList::from_entries(list.into_iter().flatten()),
            Some(RawList::Text(text)) => StringList::from_text(&text),
        })
    }
}

impl From<StringList> for Vec<String> {
    fn from(l: StringList) -> Vec<String> {
        l.0
    }
}
