// Ent Privacy System - Capability checks with an ownership fallback
// Capabilities are resolved by the viewer's guard; the policy only decides which ones to ask for

use sqlx::sqlite::Sqlite;
use sqlx::Executor;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::core::strong_types::{EntityId, EntityKind, UserId};
use crate::ent_framework::ent_schema::TypeDescriptor;
use crate::error::{AppError, AppResult};
use crate::infrastructure::viewer::ViewerContext;
use crate::stores::ownership::OwnershipStore;

/// Operations that can be controlled by privacy policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivacyOperation {
    Read,
    Create,
    Update,
    Delete,
}

impl fmt::Display for PrivacyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrivacyOperation::Read => "read",
            PrivacyOperation::Create => "create",
            PrivacyOperation::Update => "update",
            PrivacyOperation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Capabilities a route accepts for each operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCapabilities {
    pub read: Vec<String>,
    pub create: Vec<String>,
    pub update: Vec<String>,
    pub delete: Vec<String>,
}

impl RouteCapabilities {
    /// `<table>:<operation>` or `<table>:manage`, e.g. `posts:read` / `posts:manage`
    pub fn for_kind(kind: EntityKind) -> Self {
        let prefix = kind.table();
        let pair = |op: &str| vec![format!("{}:{}", prefix, op), format!("{}:manage", prefix)];
        Self {
            read: pair("read"),
            create: pair("create"),
            update: pair("update"),
            delete: pair("delete"),
        }
    }

    pub fn for_operation(&self, operation: PrivacyOperation) -> &[String] {
        match operation {
            PrivacyOperation::Read => &self.read,
            PrivacyOperation::Create => &self.create,
            PrivacyOperation::Update => &self.update,
            PrivacyOperation::Delete => &self.delete,
        }
    }
}

/// Visibility of a list request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    All,
    OwnedBy(UserId),
    Nothing,
}

#[derive(Debug, Clone)]
pub struct PrivacyPolicy {
    routes: HashMap<EntityKind, RouteCapabilities>,
}

impl Default for PrivacyPolicy {
    fn default() -> Self {
        let mut routes = HashMap::new();
        routes.insert(EntityKind::Post, RouteCapabilities::for_kind(EntityKind::Post));
        routes.insert(EntityKind::Term, RouteCapabilities::for_kind(EntityKind::Term));
        Self { routes }
    }
}

impl PrivacyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the route capabilities of one kind
    pub fn with_routes(mut self, kind: EntityKind, routes: RouteCapabilities) -> Self {
        self.routes.insert(kind, routes);
        self
    }

    /// Route capabilities for `operation`, narrowed to those the type accepts.
    /// Types that declare no capabilities accept every route capability.
    pub fn required_capabilities(
        &self,
        kind: EntityKind,
        operation: PrivacyOperation,
        descriptor: &TypeDescriptor,
    ) -> Vec<String> {
        let route = self
            .routes
            .get(&kind)
            .map(|r| r.for_operation(operation).to_vec())
            .unwrap_or_default();

        if descriptor.resolved_capabilities.is_empty() {
            return route;
        }
        route
            .into_iter()
            .filter(|c| descriptor.resolved_capabilities.contains(c))
            .collect()
    }

    pub fn has_capability(
        &self,
        vc: &ViewerContext,
        kind: EntityKind,
        operation: PrivacyOperation,
        descriptor: &TypeDescriptor,
    ) -> bool {
        vc.can_one_of(&self.required_capabilities(kind, operation, descriptor))
    }

    /// Capability only, for operations with nothing to own yet
    pub fn require_capability(
        &self,
        vc: &ViewerContext,
        kind: EntityKind,
        operation: PrivacyOperation,
        descriptor: &TypeDescriptor,
    ) -> AppResult<()> {
        if self.has_capability(vc, kind, operation, descriptor) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Not allowed to {} {} of type {}",
                operation, kind, descriptor.slug
            )))
        }
    }

    pub fn list_scope(
        &self,
        vc: &ViewerContext,
        kind: EntityKind,
        descriptor: &TypeDescriptor,
    ) -> ListScope {
        if self.has_capability(vc, kind, PrivacyOperation::Read, descriptor) {
            return ListScope::All;
        }
        match vc.user_id {
            Some(user_id) => ListScope::OwnedBy(user_id),
            None => ListScope::Nothing,
        }
    }

    /// Capability, or else ownership of the entity
    pub async fn authorize_entity<'e, E>(
        &self,
        executor: E,
        vc: &ViewerContext,
        kind: EntityKind,
        operation: PrivacyOperation,
        descriptor: &TypeDescriptor,
        entity_id: EntityId,
    ) -> AppResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if self.has_capability(vc, kind, operation, descriptor) {
            return Ok(());
        }

        if let Some(user_id) = vc.user_id {
            if OwnershipStore::is_owner(executor, kind, entity_id, user_id).await? {
                debug!(%kind, entity_id, user_id, %operation, "Allowed through ownership");
                return Ok(());
            }
        }

        Err(AppError::Forbidden(format!(
            "Not allowed to {} {} {}",
            operation, kind, entity_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sqlite_database::SqliteDatabase;

    fn post_type() -> TypeDescriptor {
        TypeDescriptor::new(1, EntityKind::Post, "post").capabilities(["posts:read", "posts:manage"])
    }

    #[test]
    fn test_required_capabilities_intersect_type() {
        let policy = PrivacyPolicy::new();
        assert_eq!(
            policy.required_capabilities(EntityKind::Post, PrivacyOperation::Read, &post_type()),
            vec!["posts:read".to_string(), "posts:manage".to_string()]
        );
        assert_eq!(
            policy.required_capabilities(EntityKind::Post, PrivacyOperation::Delete, &post_type()),
            vec!["posts:manage".to_string()]
        );

        let open = TypeDescriptor::new(2, EntityKind::Term, "tag");
        assert_eq!(
            policy.required_capabilities(EntityKind::Term, PrivacyOperation::Create, &open),
            vec!["terms:create".to_string(), "terms:manage".to_string()]
        );
    }

    #[test]
    fn test_disjoint_type_capabilities_deny_everyone() {
        let policy = PrivacyPolicy::new();
        let locked = TypeDescriptor::new(3, EntityKind::Post, "secret").capabilities(["secret:view"]);
        let vc = ViewerContext::with_capabilities(Some(1), ["posts:manage", "secret:view"]);
        assert!(!policy.has_capability(&vc, EntityKind::Post, PrivacyOperation::Read, &locked));
    }

    #[test]
    fn test_list_scope() {
        let policy = PrivacyPolicy::new();
        let reader = ViewerContext::with_capabilities(Some(1), ["posts:read"]);
        assert_eq!(policy.list_scope(&reader, EntityKind::Post, &post_type()), ListScope::All);
        assert_eq!(
            policy.list_scope(&ViewerContext::user(9), EntityKind::Post, &post_type()),
            ListScope::OwnedBy(9)
        );
        assert_eq!(
            policy.list_scope(&ViewerContext::anonymous(), EntityKind::Post, &post_type()),
            ListScope::Nothing
        );
    }

    #[test]
    fn test_require_capability_is_forbidden() {
        let policy = PrivacyPolicy::new();
        let result = policy.require_capability(
            &ViewerContext::user(1),
            EntityKind::Post,
            PrivacyOperation::Create,
            &post_type(),
        );
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_ownership_fallback() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let mut tx = db.begin_transaction().await.unwrap();
        OwnershipStore::record_touch(tx.conn(), EntityKind::Post, 5, 42).await.unwrap();
        tx.commit().await.unwrap();

        let policy = PrivacyPolicy::new();
        let owner = ViewerContext::user(42);
        let stranger = ViewerContext::user(43);

        policy
            .authorize_entity(db.pool(), &owner, EntityKind::Post, PrivacyOperation::Update, &post_type(), 5)
            .await
            .unwrap();
        let denied = policy
            .authorize_entity(db.pool(), &stranger, EntityKind::Post, PrivacyOperation::Update, &post_type(), 5)
            .await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));
        let anonymous = policy
            .authorize_entity(
                db.pool(),
                &ViewerContext::anonymous(),
                EntityKind::Post,
                PrivacyOperation::Read,
                &post_type(),
                5,
            )
            .await;
        assert!(matches!(anonymous, Err(AppError::Forbidden(_))));
    }
}
