//! Core record type definitions.
//!
//! Defines [`MemoryType`] (the record categories), [`Memory`] (a full
//! record as stored), and the inputs of the write path.

use serde::{Deserialize, Serialize};

/// Record categories. Used as the optional type filter of recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Events, decisions, session logs.
    Episodic,
    /// Facts, knowledge, preferences.
    Semantic,
    /// Workflows, patterns, how-to guides.
    Procedural,
    /// People, places, projects, things.
    Entity,
}

impl MemoryType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Entity => "entity",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "entity" => Ok(Self::Entity),
            _ => Err(format!("unknown memory type: {s}")),
        }
    }
}

/// A memory record, matching the `memories` table schema (minus the vector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// UUID v7 (time-sortable) primary key. Never reused.
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    /// Free-form storage tier label (e.g. `"hot"`), matched exactly by recall.
    pub tier: Option<String>,
    /// Archived records are kept but excluded from every search.
    pub archived: bool,
    /// Whether a vector is stored for this record.
    pub has_embedding: bool,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 last-modification timestamp.
    pub updated_at: String,
}

/// Input of [`store_memory`](crate::memory::store::store_memory).
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub memory_type: MemoryType,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub tier: Option<String>,
}

impl NewMemory {
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            memory_type,
            title: String::new(),
            content: content.into(),
            tags: Vec::new(),
            tier: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    /// Text handed to the embedding generator.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.content)
    }
}

/// Partial update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub tier: Option<Option<String>>,
}

impl MemoryUpdate {
    /// True when the update changes text that feeds the embedding.
    pub fn touches_text(&self) -> bool {
        self.title.is_some() || self.content.is_some()
    }
}

pub(crate) fn embedding_text(title: &str, content: &str) -> String {
    if title.is_empty() {
        content.to_string()
    } else {
        format!("{title}\n{content}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_type_parses_all_variants() {
        for t in ["episodic", "semantic", "procedural", "entity"] {
            let parsed: MemoryType = t.parse().unwrap();
            assert_eq!(parsed.as_str(), t);
        }
        assert!("working".parse::<MemoryType>().is_err());
    }

    #[test]
    fn embedding_text_prefixes_title() {
        let m = NewMemory::new(MemoryType::Semantic, "body").with_title("Head");
        assert_eq!(m.embedding_text(), "Head\nbody");
        let bare = NewMemory::new(MemoryType::Semantic, "body");
        assert_eq!(bare.embedding_text(), "body");
    }
}
