// EntityService - CRUD over posts and terms with visibility, hooks and revisions
// Every mutation runs in one transaction; merged reads happen after commit

use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, QueryConfig, StorageConfig};
use crate::core::slug::slugify;
use crate::core::strong_types::{EntityId, EntityKind, IdOrSlug};
use crate::ent_framework::ent_hooks::{HookContext, HookRegistry, MutationData, MutationEvent};
use crate::ent_framework::ent_privacy::{PrivacyOperation, PrivacyPolicy};
use crate::ent_framework::ent_schema::{TypeDescriptor, TypeRegistry};
use crate::error::{AppError, AppResult};
use crate::infrastructure::sqlite_database::{DatabaseTransaction, SqliteDatabase};
use crate::infrastructure::viewer::ViewerContext;
use crate::models::Entity;
use crate::query::compiler::QueryPlan;
use crate::query::request::ListRequest;
use crate::services::attachments::{self, FILE_PATH_KEY};
use crate::services::payload::{core_values, split_payload};
use crate::stores::entities::{ColumnValue, CoreValues, EntityRow, EntityStore};
use crate::stores::metadata::MetadataStore;
use crate::stores::ownership::OwnershipStore;
use crate::stores::relationships::{normalize_term_ids, RelationshipStore};
use crate::stores::revisions::{Revision, RevisionStore};

const PUBLISHED: &str = "published";
const DEFAULT_STATUS: &str = "draft";
/// Slug picks per write before a unique violation is returned as `Conflict`
const SLUG_ATTEMPTS: u32 = 3;

/// One page of a list request with its counts
#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub items: Vec<Entity>,
    /// Live entities in scope
    pub total: i64,
    /// Matches of the request before pagination
    pub total_current: i64,
    pub total_trash: i64,
    /// `total_<status>` per configured bucket
    #[serde(flatten)]
    pub status_totals: BTreeMap<String, i64>,
    pub limit: u32,
    pub offset: u32,
}

impl ListResult {
    pub fn status_total(&self, status: &str) -> i64 {
        self.status_totals
            .get(&format!("total_{}", status))
            .copied()
            .unwrap_or(0)
    }
}

/// Payload after hooks ran and values were validated
struct PreparedMutation {
    values: CoreValues,
    data: MutationData,
    terms: Option<BTreeSet<EntityId>>,
}

#[derive(Clone)]
pub struct EntityService {
    db: SqliteDatabase,
    types: Arc<dyn TypeRegistry>,
    hooks: Arc<HookRegistry>,
    privacy: PrivacyPolicy,
    query_config: QueryConfig,
    storage: StorageConfig,
}

impl EntityService {
    pub fn new(db: SqliteDatabase, types: Arc<dyn TypeRegistry>, config: &Config) -> Self {
        Self {
            db,
            types,
            hooks: Arc::new(HookRegistry::new()),
            privacy: PrivacyPolicy::new(),
            query_config: config.query.clone(),
            storage: config.storage.clone(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_privacy(mut self, privacy: PrivacyPolicy) -> Self {
        self.privacy = privacy;
        self
    }

    /// List entities of a type. Actors without the read capability only see what they own;
    /// anonymous actors without it see nothing.
    pub async fn list(
        &self,
        vc: &ViewerContext,
        kind: EntityKind,
        type_slug: &str,
        request: &ListRequest,
    ) -> AppResult<ListResult> {
        let descriptor = self.resolve_type(kind, type_slug).await?;
        let scope = self.privacy.list_scope(vc, kind, &descriptor);
        let plan = QueryPlan::compile(kind, type_slug, scope, request, &self.query_config)?;
        let output = plan.fetch(self.db.pool()).await?;

        let mut items = self.hydrate_many(kind, output.rows).await?;
        for entity in &mut items {
            self.hooks.apply_transforms(kind, type_slug, entity);
        }

        Ok(ListResult {
            items,
            total: output.total,
            total_current: output.total_current,
            total_trash: output.total_trash,
            status_totals: output
                .status_totals
                .into_iter()
                .map(|(status, n)| (format!("total_{}", status), n))
                .collect(),
            limit: plan.limit,
            offset: plan.offset,
        })
    }

    /// Fetch one entity by id or slug, trashed or not
    pub async fn get(
        &self,
        vc: &ViewerContext,
        kind: EntityKind,
        type_slug: &str,
        key: &IdOrSlug,
    ) -> AppResult<Entity> {
        let descriptor = self.resolve_type(kind, type_slug).await?;
        let row = self.find_row(kind, type_slug, key).await?;
        self.privacy
            .authorize_entity(self.db.pool(), vc, kind, PrivacyOperation::Read, &descriptor, row.id)
            .await?;

        let mut entity = self.hydrate(kind, row).await?;
        self.hooks.apply_transforms(kind, type_slug, &mut entity);
        Ok(entity)
    }

    pub async fn create(
        &self,
        vc: &ViewerContext,
        kind: EntityKind,
        type_slug: &str,
        payload: &Value,
    ) -> AppResult<Entity> {
        let descriptor = self.resolve_type(kind, type_slug).await?;
        self.privacy
            .require_capability(vc, kind, PrivacyOperation::Create, &descriptor)?;

        let mut data = split_payload(kind, payload)?;
        data.untrash = false;
        let mut ctx = HookContext {
            kind,
            type_slug: type_slug.to_string(),
            entity_id: None,
            user_id: vc.user_id,
        };
        self.hooks.run_before_insert(&ctx, &mut data).await?;

        let base_slug = data
            .core
            .get("slug")
            .and_then(Value::as_str)
            .map(slugify)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                data.get(kind.slug_source())
                    .and_then(Value::as_str)
                    .map(slugify)
                    .filter(|s| !s.is_empty())
            })
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "A slug or {} is required to create a {}",
                    kind.slug_source(),
                    kind
                ))
            })?;

        let mut prepared = prepare(kind, data)?;
        prepared
            .values
            .entry("status")
            .or_insert_with(|| ColumnValue::Text(Some(DEFAULT_STATUS.to_string())));

        let mut tx = self.db.begin_transaction().await?;
        let written = self
            .write_create(tx.conn(), vc, kind, type_slug, &base_slug, &mut prepared)
            .await;
        let id = match written {
            Ok(id) => {
                tx.commit().await?;
                id
            }
            Err(e) => {
                rollback(tx, &e).await;
                return Err(e);
            }
        };

        info!(%kind, type_slug, id, "Entity created");
        ctx.entity_id = Some(id);
        let entity = self.hydrate(kind, self.find_row(kind, type_slug, &IdOrSlug::Id(id)).await?).await?;

        let mut events = vec![MutationEvent::Created];
        if entity.row.status == PUBLISHED {
            events.push(MutationEvent::Published);
        }
        self.hooks.run_after_mutation(&ctx, &events, &entity).await;

        Ok(self.rendered(kind, type_slug, entity))
    }

    async fn write_create(
        &self,
        conn: &mut SqliteConnection,
        vc: &ViewerContext,
        kind: EntityKind,
        type_slug: &str,
        base_slug: &str,
        prepared: &mut PreparedMutation,
    ) -> AppResult<EntityId> {
        let mut attempt = 1;
        let id = loop {
            let slug = EntityStore::unique_slug(&mut *conn, kind, type_slug, base_slug, None).await?;
            prepared.values.insert("slug", ColumnValue::Text(Some(slug)));
            match EntityStore::insert(&mut *conn, kind, type_slug, &prepared.values).await {
                Err(AppError::Conflict(reason)) if attempt < SLUG_ATTEMPTS => {
                    debug!(%kind, type_slug, attempt, "Slug claimed concurrently, retrying: {}", reason);
                    attempt += 1;
                }
                written => break written?,
            }
        };
        MetadataStore::upsert_many(&mut *conn, kind, id, &prepared.data.meta).await?;
        if let Some(terms) = &prepared.terms {
            RelationshipStore::replace(&mut *conn, id, terms).await?;
        }
        if let Some(user_id) = vc.user_id {
            OwnershipStore::record_touch(&mut *conn, kind, id, user_id).await?;
        }
        Ok(id)
    }

    /// Partial update. Core columns, metadata and terms present in the payload are written;
    /// revisioned fields are captured when their value changed.
    pub async fn update(
        &self,
        vc: &ViewerContext,
        kind: EntityKind,
        type_slug: &str,
        key: &IdOrSlug,
        payload: &Value,
    ) -> AppResult<Entity> {
        let descriptor = self.resolve_type(kind, type_slug).await?;
        let row = self.find_row(kind, type_slug, key).await?;
        let id = row.id;
        self.privacy
            .authorize_entity(self.db.pool(), vc, kind, PrivacyOperation::Update, &descriptor, id)
            .await?;

        let mut data = split_payload(kind, payload)?;
        let existing = self.hydrate(kind, row).await?;
        let ctx = HookContext {
            kind,
            type_slug: type_slug.to_string(),
            entity_id: Some(id),
            user_id: vc.user_id,
        };
        self.hooks.run_before_update(&ctx, &existing, &mut data).await?;
        self.hooks.run_before_insert(&ctx, &mut data).await?;

        let requested_slug = match data.core.get("slug") {
            Some(raw) => {
                let slug = raw.as_str().map(slugify).unwrap_or_default();
                if slug.is_empty() {
                    return Err(AppError::Validation("slug cannot be empty".to_string()));
                }
                Some(slug)
            }
            None => None,
        };
        let mut prepared = prepare(kind, data)?;

        let mut tx = self.db.begin_transaction().await?;
        let written = self
            .write_update(tx.conn(), vc, kind, type_slug, id, &descriptor, requested_slug, &mut prepared)
            .await;
        match written {
            Ok(captured) => {
                tx.commit().await?;
                debug!(%kind, id, revisions = captured, "Update committed");
            }
            Err(e) => {
                rollback(tx, &e).await;
                return Err(e);
            }
        }

        info!(%kind, type_slug, id, "Entity updated");
        let entity = self.hydrate(kind, self.find_row(kind, type_slug, &IdOrSlug::Id(id)).await?).await?;

        let mut events = vec![MutationEvent::Updated];
        if entity.row.status == PUBLISHED && existing.row.status != PUBLISHED {
            events.push(MutationEvent::Published);
        }
        if existing.row.is_trashed() && !entity.row.is_trashed() {
            events.push(MutationEvent::Untrashed);
        }
        self.hooks.run_after_mutation(&ctx, &events, &entity).await;

        Ok(self.rendered(kind, type_slug, entity))
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_update(
        &self,
        conn: &mut SqliteConnection,
        vc: &ViewerContext,
        kind: EntityKind,
        type_slug: &str,
        id: EntityId,
        descriptor: &TypeDescriptor,
        requested_slug: Option<String>,
        prepared: &mut PreparedMutation,
    ) -> AppResult<usize> {
        let mut attempt = 1;
        loop {
            if let Some(base) = &requested_slug {
                let slug = EntityStore::unique_slug(&mut *conn, kind, type_slug, base, Some(id)).await?;
                prepared.values.insert("slug", ColumnValue::Text(Some(slug)));
            }
            match EntityStore::update(&mut *conn, kind, id, &prepared.values, prepared.data.untrash).await {
                Err(AppError::Conflict(reason)) if requested_slug.is_some() && attempt < SLUG_ATTEMPTS => {
                    debug!(%kind, id, attempt, "Slug claimed concurrently, retrying: {}", reason);
                    attempt += 1;
                }
                written => break written?,
            }
        }
        MetadataStore::upsert_many(&mut *conn, kind, id, &prepared.data.meta).await?;
        if let Some(terms) = &prepared.terms {
            RelationshipStore::replace(&mut *conn, id, terms).await?;
        }

        let comment = prepared.data.revision_comment.as_deref();
        let mut captured = 0;
        for field in descriptor.revisioned_fields() {
            let core_value = prepared.values.get(field).map(ColumnValue::to_json);
            let candidates = [core_value.as_ref(), prepared.data.meta.get(field)];
            for value in candidates {
                if RevisionStore::capture_if_changed(&mut *conn, kind, id, field, value, vc.user_id, comment)
                    .await?
                {
                    captured += 1;
                }
            }
        }

        if let Some(user_id) = vc.user_id {
            OwnershipStore::record_touch(&mut *conn, kind, id, user_id).await?;
        }
        Ok(captured)
    }

    /// Trash, or with `permanently` remove the entity with everything attached to it.
    /// Returns the entity as it was before the call.
    pub async fn delete(
        &self,
        vc: &ViewerContext,
        kind: EntityKind,
        type_slug: &str,
        key: &IdOrSlug,
        permanently: bool,
    ) -> AppResult<Entity> {
        let descriptor = self.resolve_type(kind, type_slug).await?;
        let row = self.find_row(kind, type_slug, key).await?;
        let id = row.id;
        self.privacy
            .authorize_entity(self.db.pool(), vc, kind, PrivacyOperation::Delete, &descriptor, id)
            .await?;

        let snapshot = self.hydrate(kind, row).await?;
        let ctx = HookContext {
            kind,
            type_slug: type_slug.to_string(),
            entity_id: Some(id),
            user_id: vc.user_id,
        };
        self.hooks.run_before_delete(&ctx, &snapshot, permanently).await?;

        if !permanently {
            let mut tx = self.db.begin_transaction().await?;
            let trashed = match EntityStore::soft_delete(tx.conn(), kind, id).await {
                Ok(trashed) => {
                    tx.commit().await?;
                    trashed
                }
                Err(e) => {
                    rollback(tx, &e).await;
                    return Err(e);
                }
            };
            if trashed {
                info!(%kind, type_slug, id, "Entity trashed");
                let entity = self.hydrate(kind, self.find_row(kind, type_slug, &IdOrSlug::Id(id)).await?).await?;
                self.hooks
                    .run_after_mutation(&ctx, &[MutationEvent::Trashed], &entity)
                    .await;
            } else {
                debug!(%kind, id, "Entity already in trash");
            }
            return Ok(self.rendered(kind, type_slug, snapshot));
        }

        let attachment = self.attachment_path(&descriptor, &snapshot).await?;

        let mut tx = self.db.begin_transaction().await?;
        match write_permanent_delete(tx.conn(), kind, id).await {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                rollback(tx, &e).await;
                return Err(e);
            }
        }
        info!(%kind, type_slug, id, "Entity permanently deleted");

        if let Some(path) = attachment {
            attachments::remove_attachment(&path).await;
        }
        self.hooks
            .run_after_mutation(&ctx, &[MutationEvent::Deleted], &snapshot)
            .await;

        Ok(self.rendered(kind, type_slug, snapshot))
    }

    /// Revision chain of one field, or of every field, newest first
    pub async fn revisions(
        &self,
        vc: &ViewerContext,
        kind: EntityKind,
        type_slug: &str,
        key: &IdOrSlug,
        field: Option<&str>,
    ) -> AppResult<Vec<Revision>> {
        let descriptor = self.resolve_type(kind, type_slug).await?;
        let row = self.find_row(kind, type_slug, key).await?;
        self.privacy
            .authorize_entity(self.db.pool(), vc, kind, PrivacyOperation::Read, &descriptor, row.id)
            .await?;

        RevisionStore::list(self.db.pool(), kind, row.id, field).await
    }

    async fn resolve_type(&self, kind: EntityKind, type_slug: &str) -> AppResult<TypeDescriptor> {
        self.types
            .resolve(kind, type_slug)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Unknown {} type '{}'", kind, type_slug)))
    }

    async fn find_row(&self, kind: EntityKind, type_slug: &str, key: &IdOrSlug) -> AppResult<EntityRow> {
        EntityStore::find(self.db.pool(), kind, type_slug, key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} '{}' of type {} not found", kind, key, type_slug)))
    }

    /// File owned by an attachment row, validated before anything is deleted
    async fn attachment_path(
        &self,
        descriptor: &TypeDescriptor,
        snapshot: &Entity,
    ) -> AppResult<Option<PathBuf>> {
        if !descriptor.attachment {
            return Ok(None);
        }
        match snapshot.meta.get(FILE_PATH_KEY) {
            Some(Value::String(relative)) if !relative.trim().is_empty() => {
                attachments::resolve_attachment_path(&self.storage.uploads_dir, relative)
                    .await
                    .map(Some)
            }
            _ => {
                warn!(id = snapshot.id(), "Attachment has no file path");
                Ok(None)
            }
        }
    }

    async fn hydrate(&self, kind: EntityKind, row: EntityRow) -> AppResult<Entity> {
        let mut entities = self.hydrate_many(kind, vec![row]).await?;
        entities
            .pop()
            .ok_or_else(|| AppError::Internal("Hydration dropped an entity".to_string()))
    }

    /// Merge rows with their metadata and, for posts, term groupings
    async fn hydrate_many(&self, kind: EntityKind, rows: Vec<EntityRow>) -> AppResult<Vec<Entity>> {
        let ids: Vec<EntityId> = rows.iter().map(|r| r.id).collect();
        let pool = self.db.pool();

        let (mut meta, mut terms) = futures::future::try_join(
            MetadataStore::get(pool, kind, &ids),
            async {
                if kind.has_relationships() {
                    RelationshipStore::list_by_entities(pool, &ids).await
                } else {
                    Ok(HashMap::new())
                }
            },
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row.id;
                let groups = kind
                    .has_relationships()
                    .then(|| terms.remove(&id).unwrap_or_default());
                Entity::new(row, meta.remove(&id).unwrap_or_default(), groups)
            })
            .collect())
    }

    fn rendered(&self, kind: EntityKind, type_slug: &str, mut entity: Entity) -> Entity {
        self.hooks.apply_transforms(kind, type_slug, &mut entity);
        entity
    }
}

/// Validate the payload as hooks left it
fn prepare(kind: EntityKind, data: MutationData) -> AppResult<PreparedMutation> {
    let values = core_values(kind, &data)?;
    let terms = data.terms.as_ref().map(normalize_term_ids).transpose()?;
    Ok(PreparedMutation { values, data, terms })
}

async fn write_permanent_delete(conn: &mut SqliteConnection, kind: EntityKind, id: EntityId) -> AppResult<()> {
    MetadataStore::delete_for_entity(&mut *conn, kind, id).await?;
    match kind {
        EntityKind::Post => RelationshipStore::delete_for_post(&mut *conn, id).await?,
        EntityKind::Term => RelationshipStore::delete_for_term(&mut *conn, id).await?,
    };
    OwnershipStore::delete_for_entity(&mut *conn, kind, id).await?;
    RevisionStore::delete_for_entity(&mut *conn, kind, id).await?;
    EntityStore::delete(&mut *conn, kind, id).await?;
    Ok(())
}

async fn rollback(tx: DatabaseTransaction, cause: &AppError) {
    warn!("Rolling back mutation: {}", cause);
    if let Err(e) = tx.rollback().await {
        warn!("Rollback failed: {}", e);
    }
}
