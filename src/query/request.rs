// List Request - declarative filters accepted by the query compiler

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::core::strong_types::IdOrSlug;
use crate::error::AppError;

/// How conditions of a meta query combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Relation {
    #[default]
    And,
    Or,
}

impl FromStr for Relation {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(Relation::And),
            "OR" => Ok(Relation::Or),
            other => Err(AppError::Validation(format!("Unknown relation '{}'", other))),
        }
    }
}

impl TryFrom<String> for Relation {
    type Error = AppError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Relation> for String {
    fn from(relation: Relation) -> Self {
        relation.to_string()
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Relation::And => "AND",
            Relation::Or => "OR",
        })
    }
}

/// Comparison applied to a decoded metadata value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompareOp {
    #[default]
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
    Between,
    NotBetween,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Like => "LIKE",
            CompareOp::NotLike => "NOT LIKE",
            CompareOp::In => "IN",
            CompareOp::NotIn => "NOT IN",
            CompareOp::Between => "BETWEEN",
            CompareOp::NotBetween => "NOT BETWEEN",
        }
    }
}

impl FromStr for CompareOp {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
        let op = match normalized.as_str() {
            "" | "=" => CompareOp::Eq,
            "!=" | "<>" => CompareOp::NotEq,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Gte,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Lte,
            "LIKE" => CompareOp::Like,
            "NOT LIKE" => CompareOp::NotLike,
            "IN" => CompareOp::In,
            "NOT IN" => CompareOp::NotIn,
            "BETWEEN" => CompareOp::Between,
            "NOT BETWEEN" => CompareOp::NotBetween,
            _ => return Err(AppError::Validation(format!("Unknown compare operator '{}'", raw))),
        };
        Ok(op)
    }
}

impl TryFrom<String> for CompareOp {
    type Error = AppError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<CompareOp> for String {
    fn from(op: CompareOp) -> Self {
        op.as_sql().to_string()
    }
}

/// One metadata predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaCondition {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub compare: CompareOp,
    /// How this condition joins the ones before it; falls back to the query's relation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,
}

impl MetaCondition {
    pub fn new(key: &str, compare: CompareOp, value: Value) -> Self {
        Self {
            key: key.to_string(),
            value,
            compare,
            relation: None,
        }
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaQuery {
    #[serde(default)]
    pub relation: Relation,
    #[serde(default)]
    pub queries: Vec<MetaCondition>,
}

/// Exact match on a core column. An array value matches any of its elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreFilter {
    pub column: String,
    pub value: Value,
}

/// Posts tagged with a term of a taxonomy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyFilter {
    pub taxonomy: String,
    pub term: IdOrSlug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Free-text search over core columns and metadata values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub term: String,
    /// Core columns to match; the kind's writable text columns when empty
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub meta_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListRequest {
    pub filters: Vec<CoreFilter>,
    pub meta_query: Option<MetaQuery>,
    pub taxonomies: Vec<TaxonomyFilter>,
    pub search: Option<SearchRequest>,
    pub trashed: bool,
    pub order_by: Option<String>,
    pub order: SortOrder,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: &str, value: Value) -> Self {
        self.filters.push(CoreFilter {
            column: column.to_string(),
            value,
        });
        self
    }

    pub fn meta_query(mut self, relation: Relation, queries: Vec<MetaCondition>) -> Self {
        self.meta_query = Some(MetaQuery { relation, queries });
        self
    }

    pub fn taxonomy(mut self, taxonomy: &str, term: impl Into<IdOrSlug>) -> Self {
        self.taxonomies.push(TaxonomyFilter {
            taxonomy: taxonomy.to_string(),
            term: term.into(),
        });
        self
    }

    pub fn search(mut self, term: &str, columns: &[&str], meta_keys: &[&str]) -> Self {
        self.search = Some(SearchRequest {
            term: term.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            meta_keys: meta_keys.iter().map(|k| k.to_string()).collect(),
        });
        self
    }

    pub fn trashed(mut self, trashed: bool) -> Self {
        self.trashed = trashed;
        self
    }

    pub fn order_by(mut self, column: &str, order: SortOrder) -> Self {
        self.order_by = Some(column.to_string());
        self.order = order;
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}
