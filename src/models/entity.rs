use serde::Serialize;
use serde_json::Value;

use crate::core::strong_types::EntityId;
use crate::stores::entities::EntityRow;
use crate::stores::metadata::MetaMap;
use crate::stores::relationships::TermGroups;

/// A core row merged with its metadata and, for posts, its terms.
/// Metadata keys sit at the top level next to the core columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    #[serde(flatten)]
    pub meta: MetaMap,
    #[serde(flatten)]
    pub row: EntityRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms: Option<TermGroups>,
}

impl Entity {
    pub fn new(row: EntityRow, meta: MetaMap, terms: Option<TermGroups>) -> Self {
        Self { meta, row, terms }
    }

    pub fn id(&self) -> EntityId {
        self.row.id
    }

    /// Core column first, then metadata
    pub fn field(&self, key: &str) -> Option<Value> {
        self.row
            .column_value(key)
            .or_else(|| self.meta.get(key).cloned())
    }

    /// Rewrite a kind-specific core column or a metadata value in place
    pub fn map_field<F>(&mut self, key: &str, f: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        if let Some(value) = self.row.columns.get_mut(key) {
            *value = f(value);
        } else if let Some(value) = self.meta.get_mut(key) {
            *value = f(value);
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
