// Ent Schema - Type descriptors for post types and taxonomies
// Descriptors are owned by an external registry; the engine only reads them

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::strong_types::EntityKind;
use crate::error::AppResult;

/// Field configured on a type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub slug: String,
    /// Capture a revision whenever this field's value changes
    pub revisions: bool,
}

impl FieldDefinition {
    pub fn new(slug: &str) -> Self {
        Self {
            slug: slug.to_string(),
            revisions: false,
        }
    }

    /// Mark field as revisioned
    pub fn revisioned(mut self) -> Self {
        self.revisions = true;
        self
    }
}

/// Resolved definition of a post type or taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub id: i64,
    pub slug: String,
    pub kind: EntityKind,
    /// Capabilities that may act on entities of this type
    pub resolved_capabilities: Vec<String>,
    pub fields: Vec<FieldDefinition>,
    /// Rows of attachment types own a file under the uploads root
    pub attachment: bool,
}

impl TypeDescriptor {
    pub fn new(id: i64, kind: EntityKind, slug: &str) -> Self {
        Self {
            id,
            slug: slug.to_string(),
            kind,
            resolved_capabilities: Vec::new(),
            fields: Vec::new(),
            attachment: false,
        }
    }

    pub fn capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resolved_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn attachment(mut self) -> Self {
        self.attachment = true;
        self
    }

    /// Slugs of fields flagged `revisions: true`
    pub fn revisioned_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.revisions)
            .map(|f| f.slug.as_str())
    }
}

/// Source of type descriptors
#[async_trait]
pub trait TypeRegistry: Send + Sync {
    async fn resolve(&self, kind: EntityKind, slug: &str) -> AppResult<Option<TypeDescriptor>>;
}

/// In-process registry populated at startup
#[derive(Debug, Default)]
pub struct StaticTypeRegistry {
    types: HashMap<(EntityKind, String), TypeDescriptor>,
}

impl StaticTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one with the same kind and slug
    pub fn register(&mut self, descriptor: TypeDescriptor) {
        self.types
            .insert((descriptor.kind, descriptor.slug.clone()), descriptor);
    }

    pub fn with(mut self, descriptor: TypeDescriptor) -> Self {
        self.register(descriptor);
        self
    }
}

#[async_trait]
impl TypeRegistry for StaticTypeRegistry {
    async fn resolve(&self, kind: EntityKind, slug: &str) -> AppResult<Option<TypeDescriptor>> {
        Ok(self.types.get(&(kind, slug.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revisioned_fields() {
        let descriptor = TypeDescriptor::new(1, EntityKind::Post, "article")
            .field(FieldDefinition::new("title").revisioned())
            .field(FieldDefinition::new("price"))
            .field(FieldDefinition::new("body").revisioned());

        let fields: Vec<&str> = descriptor.revisioned_fields().collect();
        assert_eq!(fields, vec!["title", "body"]);
    }

    #[tokio::test]
    async fn test_registry_scoped_by_kind() {
        let registry = StaticTypeRegistry::new()
            .with(TypeDescriptor::new(1, EntityKind::Post, "article"))
            .with(TypeDescriptor::new(2, EntityKind::Term, "category"));

        assert!(registry.resolve(EntityKind::Post, "article").await.unwrap().is_some());
        assert!(registry.resolve(EntityKind::Term, "article").await.unwrap().is_none());
        assert_eq!(
            registry.resolve(EntityKind::Term, "category").await.unwrap().unwrap().id,
            2
        );
    }
}
