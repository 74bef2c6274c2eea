// Strong Types - Entity kinds, identifiers and the per-kind storage layout
// Every table and column name that reaches SQL text comes from this module, never from callers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate key of posts, terms and revisions
pub type EntityId = i64;

/// Identifier of an acting user
pub type UserId = i64;

/// Storage family an entity belongs to. Both kinds share one engine and differ only in layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Post,
    Term,
}

/// How a core column value is bound and decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Timestamp,
}

/// A core column of an entity table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreColumn {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub writable: bool,
}

const fn column(name: &'static str, column_type: ColumnType, writable: bool) -> CoreColumn {
    CoreColumn {
        name,
        column_type,
        writable,
    }
}

const POST_COLUMNS: &[CoreColumn] = &[
    column("id", ColumnType::Integer, false),
    column("type_slug", ColumnType::Text, false),
    column("slug", ColumnType::Text, true),
    column("title", ColumnType::Text, true),
    column("content", ColumnType::Text, true),
    column("excerpt", ColumnType::Text, true),
    column("status", ColumnType::Text, true),
    column("created_at", ColumnType::Timestamp, false),
    column("updated_at", ColumnType::Timestamp, false),
    column("deleted_at", ColumnType::Timestamp, false),
];

const TERM_COLUMNS: &[CoreColumn] = &[
    column("id", ColumnType::Integer, false),
    column("type_slug", ColumnType::Text, false),
    column("slug", ColumnType::Text, true),
    column("name", ColumnType::Text, true),
    column("description", ColumnType::Text, true),
    column("parent_id", ColumnType::Integer, true),
    column("status", ColumnType::Text, true),
    column("created_at", ColumnType::Timestamp, false),
    column("updated_at", ColumnType::Timestamp, false),
    column("deleted_at", ColumnType::Timestamp, false),
];

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Post => "post",
            EntityKind::Term => "term",
        }
    }

    /// Core entity table
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Post => "posts",
            EntityKind::Term => "terms",
        }
    }

    pub fn meta_table(self) -> &'static str {
        match self {
            EntityKind::Post => "post_meta",
            EntityKind::Term => "term_meta",
        }
    }

    pub fn revision_table(self) -> &'static str {
        match self {
            EntityKind::Post => "post_revisions",
            EntityKind::Term => "term_revisions",
        }
    }

    pub fn owner_table(self) -> &'static str {
        match self {
            EntityKind::Post => "post_authors",
            EntityKind::Term => "term_authors",
        }
    }

    pub fn columns(self) -> &'static [CoreColumn] {
        match self {
            EntityKind::Post => POST_COLUMNS,
            EntityKind::Term => TERM_COLUMNS,
        }
    }

    /// Field a slug is derived from when the payload carries none
    pub fn slug_source(self) -> &'static str {
        match self {
            EntityKind::Post => "title",
            EntityKind::Term => "name",
        }
    }

    /// Only posts can be tagged with terms
    pub fn has_relationships(self) -> bool {
        matches!(self, EntityKind::Post)
    }

    /// Look up a core column by caller-supplied name
    pub fn column(self, name: &str) -> Option<&'static CoreColumn> {
        self.columns().iter().find(|c| c.name == name)
    }

    pub fn writable_column(self, name: &str) -> Option<&'static CoreColumn> {
        self.column(name).filter(|c| c.writable)
    }

    /// Comma separated select list of every core column
    pub fn select_list(self) -> String {
        self.columns()
            .iter()
            .map(|c| format!("e.{}", c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entities are addressed either by surrogate id or by slug
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdOrSlug {
    Id(EntityId),
    Slug(String),
}

impl IdOrSlug {
    /// Route parameters arrive as strings; all-digit values are ids
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<EntityId>() {
            Ok(id) if !raw.starts_with('+') => IdOrSlug::Id(id),
            _ => IdOrSlug::Slug(raw.to_string()),
        }
    }
}

impl From<EntityId> for IdOrSlug {
    fn from(id: EntityId) -> Self {
        IdOrSlug::Id(id)
    }
}

impl From<&str> for IdOrSlug {
    fn from(raw: &str) -> Self {
        IdOrSlug::parse(raw)
    }
}

impl fmt::Display for IdOrSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdOrSlug::Id(id) => write!(f, "{}", id),
            IdOrSlug::Slug(slug) => write!(f, "{}", slug),
        }
    }
}
