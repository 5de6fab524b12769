//! Canonical keywords and the closed type/category enumerations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ValidationError;

/// Unique identifier for a canonical keyword
///
/// Serializes as a plain string. Ordering is lexicographic on the string and
/// is the canonical ordering used for co-occurrence pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordId(String);

impl KeywordId {
    /// Create a new random KeywordId (UUID-based)
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a KeywordId from an existing string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for KeywordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for KeywordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for KeywordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The two closed keyword kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordType {
    /// People, places, organizations
    Entity,
    /// Abstract themes
    Concept,
}

impl KeywordType {
    pub const ALL: [KeywordType; 2] = [KeywordType::Entity, KeywordType::Concept];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordType::Entity => "entity",
            KeywordType::Concept => "concept",
        }
    }
}

impl fmt::Display for KeywordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeywordType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entity" => Ok(KeywordType::Entity),
            "concept" => Ok(KeywordType::Concept),
            other => Err(ValidationError::UnknownKeywordType(other.to_string())),
        }
    }
}

/// Topical category of a keyword
///
/// Entity categories and concept categories are disjoint; a category is only
/// valid together with its own keyword type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordCategory {
    Person,
    Place,
    Organization,
    Geopolitics,
    EconomicCrisis,
    Innovation,
}

impl KeywordCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordCategory::Person => "person",
            KeywordCategory::Place => "place",
            KeywordCategory::Organization => "organization",
            KeywordCategory::Geopolitics => "geopolitics",
            KeywordCategory::EconomicCrisis => "economic_crisis",
            KeywordCategory::Innovation => "innovation",
        }
    }

    /// The keyword type this category belongs to
    pub fn keyword_type(&self) -> KeywordType {
        match self {
            KeywordCategory::Person | KeywordCategory::Place | KeywordCategory::Organization => {
                KeywordType::Entity
            }
            KeywordCategory::Geopolitics
            | KeywordCategory::EconomicCrisis
            | KeywordCategory::Innovation => KeywordType::Concept,
        }
    }
}

impl fmt::Display for KeywordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeywordCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "person" => Ok(KeywordCategory::Person),
            "place" => Ok(KeywordCategory::Place),
            "organization" | "organisation" => Ok(KeywordCategory::Organization),
            "geopolitics" => Ok(KeywordCategory::Geopolitics),
            "economic_crisis" => Ok(KeywordCategory::EconomicCrisis),
            "innovation" => Ok(KeywordCategory::Innovation),
            _ => Err(ValidationError::UnknownKeywordCategory(s.to_string())),
        }
    }
}

/// A deduplicated keyword that mentions resolve to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalKeyword {
    /// Unique identifier
    pub id: KeywordId,
    /// Standardized display name
    pub canonical_name: String,
    pub keyword_type: KeywordType,
    pub category: KeywordCategory,
    /// Representative embedding, kept centered on all matched mentions
    pub embedding: Vec<f32>,
    /// Surface forms ever matched to this keyword (append-only)
    pub aliases: Vec<String>,
    /// Number of mentions folded into the embedding
    pub mention_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl CanonicalKeyword {
    /// Create a keyword from its first mention
    pub fn new(
        canonical_name: impl Into<String>,
        keyword_type: KeywordType,
        category: KeywordCategory,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: KeywordId::new(),
            canonical_name: canonical_name.into(),
            keyword_type,
            category,
            embedding,
            aliases: Vec::new(),
            mention_count: 1,
            created_at: now,
            last_seen_at: now,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.add_alias(alias);
        self
    }

    /// Append an alias if it is not already known. Returns true if added.
    pub fn add_alias(&mut self, alias: impl Into<String>) -> bool {
        let alias = alias.into();
        let trimmed = alias.trim();
        if trimmed.is_empty() || self.aliases.iter().any(|a| a == trimmed) {
            return false;
        }
        self.aliases.push(trimmed.to_string());
        true
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a == alias)
    }

    /// Fold one more mention embedding into the representative embedding.
    ///
    /// Weighted running average: `(e * n + m) / (n + 1)`.
    pub fn absorb_embedding(&mut self, mention: &[f32]) {
        if mention.len() != self.embedding.len() {
            return;
        }
        let n = self.mention_count as f32;
        for (e, m) in self.embedding.iter_mut().zip(mention.iter()) {
            *e = (*e * n + *m) / (n + 1.0);
        }
        self.mention_count += 1;
    }

    /// Fold another canonical keyword into this one (reconciliation).
    ///
    /// Aliases are unioned, the embedding is averaged by mention count and
    /// timestamps widen to cover both.
    pub fn absorb_keyword(&mut self, other: &CanonicalKeyword) {
        self.add_alias(other.canonical_name.clone());
        for alias in &other.aliases {
            self.add_alias(alias.clone());
        }
        if other.embedding.len() == self.embedding.len() {
            let n = self.mention_count as f32;
            let m = other.mention_count as f32;
            if n + m > 0.0 {
                for (e, o) in self.embedding.iter_mut().zip(other.embedding.iter()) {
                    *e = (*e * n + *o * m) / (n + m);
                }
            }
        }
        self.mention_count += other.mention_count;
        self.created_at = self.created_at.min(other.created_at);
        self.last_seen_at = self.last_seen_at.max(other.last_seen_at);
    }

    /// Advance last-seen to now
    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }
}

/// A keyword without its embedding, for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordSummary {
    pub id: KeywordId,
    pub canonical_name: String,
    #[serde(rename = "type")]
    pub keyword_type: KeywordType,
    pub category: KeywordCategory,
    pub aliases: Vec<String>,
    pub mention_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl From<&CanonicalKeyword> for KeywordSummary {
    fn from(kw: &CanonicalKeyword) -> Self {
        Self {
            id: kw.id.clone(),
            canonical_name: kw.canonical_name.clone(),
            keyword_type: kw.keyword_type,
            category: kw.category,
            aliases: kw.aliases.clone(),
            mention_count: kw.mention_count,
            created_at: kw.created_at,
            last_seen_at: kw.last_seen_at,
        }
    }
}

impl KeywordSummary {
    /// Case-insensitive substring match on the canonical name or any alias
    pub fn matches_name(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        std::iter::once(&self.canonical_name)
            .chain(self.aliases.iter())
            .any(|name| name.to_lowercase().contains(&needle))
    }
}
