// Ent Hooks System - Typed extension points around entity mutations
// Hooks are registered per entity kind, optionally narrowed to one type slug

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::strong_types::{EntityId, EntityKind, UserId};
use crate::error::{AppError, AppResult};
use crate::models::Entity;
use crate::stores::metadata::MetaMap;

/// Hook context containing mutation information
#[derive(Debug, Clone)]
pub struct HookContext {
    pub kind: EntityKind,
    pub type_slug: String,
    /// None until the row exists
    pub entity_id: Option<EntityId>,
    pub user_id: Option<UserId>,
}

/// A mutation payload after it has been split by destination.
/// Hooks may rewrite any part before it is validated and written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationData {
    /// Writable core columns
    pub core: Map<String, Value>,
    pub meta: MetaMap,
    /// Raw `terms` payload, normalized after hooks run
    pub terms: Option<Value>,
    /// `deleted_at: null` was supplied
    pub untrash: bool,
    pub revision_comment: Option<String>,
}

impl MutationData {
    /// Value of `key` as supplied, core first
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.core.get(key).or_else(|| self.meta.get(key))
    }
}

/// Side effects delivered to `after_mutation`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationEvent {
    Created,
    Updated,
    /// Status moved into `published`
    Published,
    Trashed,
    Untrashed,
    /// Permanently removed
    Deleted,
}

#[async_trait]
pub trait EntityHooks: Send + Sync {
    fn name(&self) -> &str;

    /// Runs before a new row is written, and after `before_update` on updates
    async fn before_insert(&self, _ctx: &HookContext, _data: &mut MutationData) -> AppResult<()> {
        Ok(())
    }

    async fn before_update(
        &self,
        _ctx: &HookContext,
        _existing: &Entity,
        _data: &mut MutationData,
    ) -> AppResult<()> {
        Ok(())
    }

    /// Returning false vetoes the deletion
    async fn before_delete(
        &self,
        _ctx: &HookContext,
        _existing: &Entity,
        _permanently: bool,
    ) -> AppResult<bool> {
        Ok(true)
    }

    /// Runs after commit; errors are logged, never surfaced
    async fn after_mutation(
        &self,
        _ctx: &HookContext,
        _event: MutationEvent,
        _entity: &Entity,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// Read-time rendering of one field, e.g. markdown to HTML
pub trait ContentTransform: Send + Sync {
    fn field(&self) -> &str;
    fn transform(&self, value: &Value) -> Value;
}

struct Scoped<T: ?Sized> {
    kind: EntityKind,
    type_slug: Option<String>,
    item: Arc<T>,
}

impl<T: ?Sized> Scoped<T> {
    fn applies(&self, kind: EntityKind, type_slug: &str) -> bool {
        self.kind == kind && self.type_slug.as_deref().map_or(true, |s| s == type_slug)
    }
}

/// Hook registry for managing entity hooks
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Scoped<dyn EntityHooks>>,
    transforms: Vec<Scoped<dyn ContentTransform>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `type_slug: None` registers for every type of the kind
    pub fn register_hook(
        &mut self,
        kind: EntityKind,
        type_slug: Option<&str>,
        hook: Arc<dyn EntityHooks>,
    ) {
        debug!(%kind, type_slug, hook = hook.name(), "Registered entity hook");
        self.hooks.push(Scoped {
            kind,
            type_slug: type_slug.map(str::to_string),
            item: hook,
        });
    }

    pub fn register_transform(
        &mut self,
        kind: EntityKind,
        type_slug: Option<&str>,
        transform: Arc<dyn ContentTransform>,
    ) {
        self.transforms.push(Scoped {
            kind,
            type_slug: type_slug.map(str::to_string),
            item: transform,
        });
    }

    fn hooks_for<'a>(&'a self, ctx: &'a HookContext) -> impl Iterator<Item = &'a Arc<dyn EntityHooks>> + 'a {
        self.hooks
            .iter()
            .filter(move |h| h.applies(ctx.kind, &ctx.type_slug))
            .map(|h| &h.item)
    }

    pub async fn run_before_insert(&self, ctx: &HookContext, data: &mut MutationData) -> AppResult<()> {
        for hook in self.hooks_for(ctx) {
            hook.before_insert(ctx, data).await?;
        }
        Ok(())
    }

    pub async fn run_before_update(
        &self,
        ctx: &HookContext,
        existing: &Entity,
        data: &mut MutationData,
    ) -> AppResult<()> {
        for hook in self.hooks_for(ctx) {
            hook.before_update(ctx, existing, data).await?;
        }
        Ok(())
    }

    pub async fn run_before_delete(
        &self,
        ctx: &HookContext,
        existing: &Entity,
        permanently: bool,
    ) -> AppResult<()> {
        for hook in self.hooks_for(ctx) {
            if !hook.before_delete(ctx, existing, permanently).await? {
                return Err(AppError::Vetoed(format!(
                    "Deletion of {} {} vetoed by hook '{}'",
                    ctx.kind,
                    existing.id(),
                    hook.name()
                )));
            }
        }
        Ok(())
    }

    pub async fn run_after_mutation(&self, ctx: &HookContext, events: &[MutationEvent], entity: &Entity) {
        for hook in self.hooks_for(ctx) {
            for event in events {
                if let Err(e) = hook.after_mutation(ctx, *event, entity).await {
                    warn!(
                        hook = hook.name(),
                        kind = %ctx.kind,
                        entity_id = entity.id(),
                        ?event,
                        "after_mutation hook failed: {}",
                        e
                    );
                }
            }
        }
    }

    pub fn apply_transforms(&self, kind: EntityKind, type_slug: &str, entity: &mut Entity) {
        for transform in self.transforms.iter().filter(|t| t.applies(kind, type_slug)) {
            let transform = &transform.item;
            entity.map_field(transform.field(), |value| transform.transform(value));
        }
    }
}
