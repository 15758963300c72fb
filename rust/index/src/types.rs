use serde::{Deserialize, Serialize};

/// Caller-owned identifier of an indexed document.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        DocumentId(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        DocumentId(value)
    }
}

impl From<u64> for DocumentId {
    fn from(value: u64) -> Self {
        DocumentId(value.to_string())
    }
}

/// One ranked search hit. `distance` is a squared L2 distance estimated from
/// the compressed code, so it is approximate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub doc_id: DocumentId,
    pub distance: f32,
}

/// Address of an entry inside the inverted lists.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntryLocation {
    pub partition: usize,
    pub offset: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Untrained,
    Trained,
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexState::Untrained => f.write_str("untrained"),
            IndexState::Trained => f.write_str("trained"),
        }
    }
}
