// Query Compiler - ListRequest to parameterized, counted and paginated SQL
// Identifiers come only from the entity kind's column whitelist; every caller value is bound

use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::{QueryBuilder, Row};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::QueryConfig;
use crate::core::canonical_json;
use crate::core::strong_types::{ColumnType, EntityKind, IdOrSlug, UserId};
use crate::ent_framework::ent_privacy::ListScope;
use crate::error::{AppError, AppResult};
use crate::query::request::{CompareOp, ListRequest, MetaCondition, MetaQuery, Relation, SortOrder};
use crate::stores::entities::EntityRow;

/// Decoded form of a stored metadata value inside a correlated subquery
const DECODED_META: &str =
    "(CASE WHEN json_valid(m.value) THEN json_extract(m.value, '$') ELSE m.value END)";

/// Numeric ranges only match stored numbers; SQLite orders all text above all numbers
const NUMERIC_META_GUARD: &str =
    "typeof(CASE WHEN json_valid(m.value) THEN json_extract(m.value, '$') ELSE m.value END) IN ('integer', 'real') AND ";

/// A caller value ready to bind
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Operand {
    /// Booleans bind as 0/1 and structured values as canonical JSON text,
    /// matching what `json_extract` yields for stored values
    pub fn from_json(value: &Value) -> AppResult<Self> {
        Ok(match value {
            Value::Null => Operand::Null,
            Value::Bool(b) => Operand::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Operand::Integer(i),
                None => Operand::Real(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Operand::Text(s.clone()),
            other => Operand::Text(canonical_json::encode(other)?),
        })
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Operand::Integer(_) | Operand::Real(_))
    }

    fn as_text(&self) -> String {
        match self {
            Operand::Null => String::new(),
            Operand::Integer(i) => i.to_string(),
            Operand::Real(f) => f.to_string(),
            Operand::Text(s) => s.clone(),
        }
    }

    fn push(&self, qb: &mut QueryBuilder<'static, Sqlite>) {
        match self {
            Operand::Null => qb.push_bind(None::<String>),
            Operand::Integer(i) => qb.push_bind(*i),
            Operand::Real(f) => qb.push_bind(*f),
            Operand::Text(s) => qb.push_bind(s.clone()),
        };
    }
}

/// Right-hand side of a compiled meta condition
#[derive(Debug, Clone, PartialEq)]
pub enum MetaOperand {
    Single(Operand),
    List(Vec<Operand>),
    Range(Operand, Operand),
}

/// Meta conditions folded left into a binary tree
#[derive(Debug, Clone, PartialEq)]
pub enum MetaExpr {
    Condition {
        key: String,
        compare: CompareOp,
        operand: MetaOperand,
    },
    Both(Box<MetaExpr>, Box<MetaExpr>),
    Either(Box<MetaExpr>, Box<MetaExpr>),
}

/// One conjunct of a plan's WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    TypeIs(String),
    Live,
    Trashed,
    OwnedBy(UserId),
    /// Matches no rows
    Never,
    /// `=` for one value, `IN` for several
    Column {
        column: &'static str,
        values: Vec<Operand>,
    },
    MetaGroup(MetaExpr),
    Taxonomy {
        taxonomy: String,
        term: IdOrSlug,
    },
    Search {
        pattern: String,
        columns: Vec<&'static str>,
        meta_keys: Vec<String>,
    },
}

/// Compiled list request
#[derive(Debug, Clone)]
pub struct QueryPlan {
    kind: EntityKind,
    /// Type and visibility scope; the denominator of every count
    base: Vec<Predicate>,
    /// Trash state plus caller filters
    filters: Vec<Predicate>,
    status_buckets: Vec<String>,
    order_by: &'static str,
    order: SortOrder,
    pub limit: u32,
    pub offset: u32,
}

/// Rows and counts produced by a plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutput {
    pub rows: Vec<EntityRow>,
    pub total: i64,
    pub total_current: i64,
    pub total_trash: i64,
    pub status_totals: BTreeMap<String, i64>,
}

impl QueryPlan {
    pub fn compile(
        kind: EntityKind,
        type_slug: &str,
        scope: ListScope,
        request: &ListRequest,
        config: &QueryConfig,
    ) -> AppResult<Self> {
        let mut base = vec![Predicate::TypeIs(type_slug.to_string())];
        match scope {
            ListScope::All => {}
            ListScope::OwnedBy(user_id) => base.push(Predicate::OwnedBy(user_id)),
            ListScope::Nothing => base.push(Predicate::Never),
        }

        let mut filters = vec![if request.trashed {
            Predicate::Trashed
        } else {
            Predicate::Live
        }];

        for filter in &request.filters {
            let column = kind.column(&filter.column).ok_or_else(|| {
                AppError::Validation(format!("Unknown {} column '{}'", kind, filter.column))
            })?;
            let values = match &filter.value {
                Value::Array(items) => items.iter().map(Operand::from_json).collect::<AppResult<Vec<_>>>()?,
                single => vec![Operand::from_json(single)?],
            };
            if values.is_empty() {
                filters.push(Predicate::Never);
                continue;
            }
            filters.push(Predicate::Column {
                column: column.name,
                values,
            });
        }

        if let Some(meta_query) = &request.meta_query {
            if let Some(expr) = compile_meta_query(meta_query)? {
                filters.push(Predicate::MetaGroup(expr));
            }
        }

        if !request.taxonomies.is_empty() && !kind.has_relationships() {
            return Err(AppError::Validation(format!(
                "{} entities cannot be filtered by taxonomy",
                kind
            )));
        }
        for taxonomy in &request.taxonomies {
            filters.push(Predicate::Taxonomy {
                taxonomy: taxonomy.taxonomy.clone(),
                term: taxonomy.term.clone(),
            });
        }

        if let Some(search) = &request.search {
            let term = search.term.trim();
            if !term.is_empty() {
                let columns = if search.columns.is_empty() && search.meta_keys.is_empty() {
                    kind.columns()
                        .iter()
                        .filter(|c| c.writable && c.column_type == ColumnType::Text && c.name != "status")
                        .map(|c| c.name)
                        .collect()
                } else {
                    search
                        .columns
                        .iter()
                        .map(|name| {
                            kind.column(name).map(|c| c.name).ok_or_else(|| {
                                AppError::Validation(format!("Unknown {} column '{}'", kind, name))
                            })
                        })
                        .collect::<AppResult<Vec<_>>>()?
                };
                filters.push(Predicate::Search {
                    pattern: format!("%{}%", term),
                    columns,
                    meta_keys: search.meta_keys.clone(),
                });
            }
        }

        let order_by = match &request.order_by {
            Some(name) => {
                kind.column(name)
                    .ok_or_else(|| AppError::Validation(format!("Cannot order {} by '{}'", kind, name)))?
                    .name
            }
            None => "id",
        };

        let limit = match request.limit {
            Some(0) => return Err(AppError::Validation("limit must be at least 1".to_string())),
            Some(limit) => limit.min(config.max_limit),
            None => config.default_limit.min(config.max_limit),
        };

        Ok(Self {
            kind,
            base,
            filters,
            status_buckets: config.status_buckets.clone(),
            order_by,
            order: request.order,
            limit,
            offset: request.offset.unwrap_or(0),
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Page of rows matching every predicate
    pub fn rows_query(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {} FROM {} e WHERE ",
            self.kind.select_list(),
            self.kind.table()
        ));
        self.push_where(&mut qb, self.base.iter().chain(self.filters.iter()));
        qb.push(format!(" ORDER BY e.{} {}", self.order_by, self.order.as_sql()));
        if self.order_by != "id" {
            qb.push(format!(", e.id {}", self.order.as_sql()));
        }
        qb.push(" LIMIT ").push_bind(i64::from(self.limit));
        qb.push(" OFFSET ").push_bind(i64::from(self.offset));
        qb
    }

    /// Post-filter count, ignoring pagination
    pub fn current_count_query(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) AS n FROM {} e WHERE ", self.kind.table()));
        self.push_where(&mut qb, self.base.iter().chain(self.filters.iter()));
        qb
    }

    /// Filter-independent totals over the base scope: live, trash and one per status bucket
    pub fn totals_query(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new(
            "SELECT COALESCE(SUM(CASE WHEN e.deleted_at IS NULL THEN 1 ELSE 0 END), 0) AS live, \
             COALESCE(SUM(CASE WHEN e.deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS trash",
        );
        for (i, status) in self.status_buckets.iter().enumerate() {
            qb.push(", COALESCE(SUM(CASE WHEN e.deleted_at IS NULL AND e.status = ");
            qb.push_bind(status.clone());
            qb.push(format!(" THEN 1 ELSE 0 END), 0) AS bucket_{}", i));
        }
        qb.push(format!(" FROM {} e WHERE ", self.kind.table()));
        self.push_where(&mut qb, self.base.iter());
        qb
    }

    pub async fn fetch(&self, pool: &SqlitePool) -> AppResult<PlanOutput> {
        let mut totals_qb = self.totals_query();
        let mut current_qb = self.current_count_query();
        let mut rows_qb = self.rows_query();

        let (totals, current, rows) = futures::try_join!(
            async {
                totals_qb
                    .build()
                    .fetch_one(pool)
                    .await
                    .map_err(|e| AppError::DatabaseError(format!("Failed to count {}s: {}", self.kind, e)))
            },
            async {
                current_qb
                    .build()
                    .fetch_one(pool)
                    .await
                    .map_err(|e| AppError::DatabaseError(format!("Failed to count {}s: {}", self.kind, e)))
            },
            async {
                rows_qb
                    .build()
                    .fetch_all(pool)
                    .await
                    .map_err(|e| AppError::DatabaseError(format!("Failed to list {}s: {}", self.kind, e)))
            },
        )?;

        let mut status_totals = BTreeMap::new();
        for (i, status) in self.status_buckets.iter().enumerate() {
            status_totals.insert(status.clone(), totals.get::<i64, _>(format!("bucket_{}", i).as_str()));
        }

        let rows = rows
            .iter()
            .map(|row| EntityRow::from_row(self.kind, row))
            .collect::<AppResult<Vec<_>>>()?;

        let output = PlanOutput {
            rows,
            total: totals.get("live"),
            total_current: current.get("n"),
            total_trash: totals.get("trash"),
            status_totals,
        };
        debug!(
            kind = %self.kind,
            total = output.total,
            total_current = output.total_current,
            returned = output.rows.len(),
            "List query executed"
        );
        Ok(output)
    }

    fn push_where<'p>(
        &self,
        qb: &mut QueryBuilder<'static, Sqlite>,
        predicates: impl Iterator<Item = &'p Predicate>,
    ) {
        let mut first = true;
        for predicate in predicates {
            if !first {
                qb.push(" AND ");
            }
            first = false;
            self.push_predicate(qb, predicate);
        }
        if first {
            qb.push("1 = 1");
        }
    }

    fn push_predicate(&self, qb: &mut QueryBuilder<'static, Sqlite>, predicate: &Predicate) {
        let kind = self.kind;
        match predicate {
            Predicate::TypeIs(type_slug) => {
                qb.push("e.type_slug = ").push_bind(type_slug.clone());
            }
            Predicate::Live => {
                qb.push("e.deleted_at IS NULL");
            }
            Predicate::Trashed => {
                qb.push("e.deleted_at IS NOT NULL");
            }
            Predicate::OwnedBy(user_id) => {
                qb.push(format!(
                    "EXISTS (SELECT 1 FROM {} o WHERE o.entity_id = e.id AND o.user_id = ",
                    kind.owner_table()
                ));
                qb.push_bind(*user_id).push(")");
            }
            Predicate::Never => {
                qb.push("1 = 0");
            }
            Predicate::Column { column, values } => match values.as_slice() {
                [Operand::Null] => {
                    qb.push(format!("e.{} IS NULL", column));
                }
                [single] => {
                    qb.push(format!("e.{} = ", column));
                    single.push(qb);
                }
                many => {
                    let present: Vec<Operand> =
                        many.iter().filter(|v| **v != Operand::Null).cloned().collect();
                    if present.len() < many.len() {
                        qb.push(format!("(e.{} IS NULL OR ", column));
                    }
                    match present.as_slice() {
                        [] => {
                            qb.push("1 = 0");
                        }
                        [single] => {
                            qb.push(format!("e.{} = ", column));
                            single.push(qb);
                        }
                        _ => {
                            qb.push(format!("e.{} IN (", column));
                            push_list(qb, &present);
                            qb.push(")");
                        }
                    }
                    if present.len() < many.len() {
                        qb.push(")");
                    }
                }
            },
            Predicate::MetaGroup(expr) => push_meta_expr(qb, kind, expr),
            Predicate::Taxonomy { taxonomy, term } => {
                qb.push(
                    "EXISTS (SELECT 1 FROM post_terms r JOIN terms t ON t.id = r.term_id \
                     WHERE r.post_id = e.id AND t.deleted_at IS NULL AND t.type_slug = ",
                );
                qb.push_bind(taxonomy.clone());
                match term {
                    IdOrSlug::Id(id) => {
                        qb.push(" AND t.id = ").push_bind(*id);
                    }
                    IdOrSlug::Slug(slug) => {
                        qb.push(" AND t.slug = ").push_bind(slug.clone());
                    }
                }
                qb.push(")");
            }
            Predicate::Search {
                pattern,
                columns,
                meta_keys,
            } => {
                qb.push("(");
                let mut first = true;
                for column in columns {
                    if !first {
                        qb.push(" OR ");
                    }
                    first = false;
                    qb.push(format!("e.{} LIKE ", column)).push_bind(pattern.clone());
                }
                if !meta_keys.is_empty() {
                    if !first {
                        qb.push(" OR ");
                    }
                    first = false;
                    qb.push(format!(
                        "EXISTS (SELECT 1 FROM {} m WHERE m.entity_id = e.id AND (",
                        kind.meta_table()
                    ));
                    for (i, key) in meta_keys.iter().enumerate() {
                        if i > 0 {
                            qb.push(" OR ");
                        }
                        qb.push("(m.field_slug = ")
                            .push_bind(key.clone())
                            .push(" AND m.value LIKE ")
                            .push_bind(pattern.clone())
                            .push(")");
                    }
                    qb.push("))");
                }
                if first {
                    qb.push("1 = 0");
                }
                qb.push(")");
            }
        }
    }
}

/// Fold conditions left: condition i joins the accumulated expression with its own
/// relation, or the query's relation when it has none
fn compile_meta_query(query: &MetaQuery) -> AppResult<Option<MetaExpr>> {
    let mut acc: Option<MetaExpr> = None;
    for condition in &query.queries {
        let next = compile_condition(condition)?;
        acc = Some(match acc {
            None => next,
            Some(prev) => match condition.relation.unwrap_or(query.relation) {
                Relation::And => MetaExpr::Both(Box::new(prev), Box::new(next)),
                Relation::Or => MetaExpr::Either(Box::new(prev), Box::new(next)),
            },
        });
    }
    Ok(acc)
}

fn compile_condition(condition: &MetaCondition) -> AppResult<MetaExpr> {
    if condition.key.trim().is_empty() {
        return Err(AppError::Validation("meta_query key cannot be empty".to_string()));
    }

    let operand = match condition.compare {
        CompareOp::In | CompareOp::NotIn => match &condition.value {
            Value::Array(items) => MetaOperand::List(
                items.iter().map(Operand::from_json).collect::<AppResult<Vec<_>>>()?,
            ),
            single => MetaOperand::List(vec![Operand::from_json(single)?]),
        },
        CompareOp::Between | CompareOp::NotBetween => match &condition.value {
            Value::Array(items) if items.len() == 2 => {
                MetaOperand::Range(Operand::from_json(&items[0])?, Operand::from_json(&items[1])?)
            }
            other => {
                return Err(AppError::Validation(format!(
                    "{} on '{}' needs a two element array, got {}",
                    condition.compare.as_sql(),
                    condition.key,
                    other
                )))
            }
        },
        _ => MetaOperand::Single(Operand::from_json(&condition.value)?),
    };

    Ok(MetaExpr::Condition {
        key: condition.key.clone(),
        compare: condition.compare,
        operand,
    })
}

fn push_list(qb: &mut QueryBuilder<'static, Sqlite>, operands: &[Operand]) {
    for (i, operand) in operands.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        operand.push(qb);
    }
}

fn push_meta_expr(qb: &mut QueryBuilder<'static, Sqlite>, kind: EntityKind, expr: &MetaExpr) {
    match expr {
        MetaExpr::Both(left, right) | MetaExpr::Either(left, right) => {
            let joiner = if matches!(expr, MetaExpr::Both(..)) { " AND " } else { " OR " };
            qb.push("(");
            push_meta_expr(qb, kind, left);
            qb.push(joiner);
            push_meta_expr(qb, kind, right);
            qb.push(")");
        }
        MetaExpr::Condition { key, compare, operand } => {
            qb.push(format!(
                "EXISTS (SELECT 1 FROM {} m WHERE m.entity_id = e.id AND m.field_slug = ",
                kind.meta_table()
            ));
            qb.push_bind(key.clone()).push(" AND ");
            push_comparison(qb, *compare, operand);
            qb.push(")");
        }
    }
}

fn push_comparison(qb: &mut QueryBuilder<'static, Sqlite>, compare: CompareOp, operand: &MetaOperand) {
    match (compare, operand) {
        (CompareOp::Eq, MetaOperand::Single(Operand::Null)) => {
            qb.push(format!("{} IS NULL", DECODED_META));
        }
        (CompareOp::NotEq, MetaOperand::Single(Operand::Null)) => {
            qb.push(format!("{} IS NOT NULL", DECODED_META));
        }
        (CompareOp::Like | CompareOp::NotLike, MetaOperand::Single(value)) => {
            qb.push(format!("{} {} ", DECODED_META, compare.as_sql()));
            qb.push_bind(format!("%{}%", value.as_text()));
        }
        (CompareOp::In | CompareOp::NotIn, MetaOperand::List(items)) if items.is_empty() => {
            qb.push(if compare == CompareOp::In { "1 = 0" } else { "1 = 1" });
        }
        (_, MetaOperand::List(items)) => {
            qb.push(format!("{} {} (", DECODED_META, compare.as_sql()));
            push_list(qb, items);
            qb.push(")");
        }
        (_, MetaOperand::Range(low, high)) => {
            if low.is_numeric() && high.is_numeric() {
                qb.push(NUMERIC_META_GUARD);
            }
            qb.push(format!("{} {} ", DECODED_META, compare.as_sql()));
            low.push(qb);
            qb.push(" AND ");
            high.push(qb);
        }
        (CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte, MetaOperand::Single(value))
            if value.is_numeric() =>
        {
            qb.push(NUMERIC_META_GUARD);
            qb.push(format!("{} {} ", DECODED_META, compare.as_sql()));
            value.push(qb);
        }
        (_, MetaOperand::Single(value)) => {
            qb.push(format!("{} {} ", DECODED_META, compare.as_sql()));
            value.push(qb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sqlite_database::SqliteDatabase;
    use crate::query::request::MetaCondition;
    use crate::stores::entities::{ColumnValue, CoreValues, EntityStore};
    use crate::stores::metadata::MetadataStore;
    use crate::stores::ownership::OwnershipStore;
    use crate::stores::relationships::RelationshipStore;
    use serde_json::json;

    async fn seed_post(db: &SqliteDatabase, slug: &str, status: &str, meta: Value) -> i64 {
        let mut values = CoreValues::new();
        values.insert("slug", ColumnValue::Text(Some(slug.to_string())));
        values.insert("title", ColumnValue::Text(Some(slug.to_uppercase())));
        values.insert("status", ColumnValue::Text(Some(status.to_string())));
        let mut tx = db.begin_transaction().await.unwrap();
        let id = EntityStore::insert(tx.conn(), EntityKind::Post, "product", &values).await.unwrap();
        if let Value::Object(fields) = meta {
            MetadataStore::upsert_many(tx.conn(), EntityKind::Post, id, &fields).await.unwrap();
        }
        tx.commit().await.unwrap();
        id
    }

    async fn run(db: &SqliteDatabase, scope: ListScope, request: ListRequest) -> PlanOutput {
        QueryPlan::compile(EntityKind::Post, "product", scope, &request, &QueryConfig::default())
            .unwrap()
            .fetch(db.pool())
            .await
            .unwrap()
    }

    fn slugs(output: &PlanOutput) -> Vec<String> {
        let mut slugs: Vec<String> = output.rows.iter().map(|r| r.slug.clone()).collect();
        slugs.sort();
        slugs
    }

    #[tokio::test]
    async fn test_meta_in_matches_decoded_values() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        seed_post(&db, "a", "draft", json!({"color": "red"})).await;
        seed_post(&db, "b", "draft", json!({"color": "blue"})).await;
        seed_post(&db, "c", "draft", json!({"color": "green"})).await;
        seed_post(&db, "d", "draft", json!({"size": "red"})).await;

        let output = run(
            &db,
            ListScope::All,
            ListRequest::new().meta_query(
                Relation::And,
                vec![MetaCondition::new("color", CompareOp::In, json!(["red", "blue"]))],
            ),
        )
        .await;
        assert_eq!(slugs(&output), vec!["a", "b"]);
        assert_eq!(output.total_current, 2);
        assert_eq!(output.total, 4);
    }

    #[tokio::test]
    async fn test_meta_or_returns_union() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        seed_post(&db, "featured", "draft", json!({"featured": true, "price": 10})).await;
        seed_post(&db, "pricey", "draft", json!({"featured": false, "price": 150})).await;
        seed_post(&db, "both", "draft", json!({"featured": true, "price": 300})).await;
        seed_post(&db, "neither", "draft", json!({"featured": false, "price": 100})).await;

        let output = run(
            &db,
            ListScope::All,
            ListRequest::new().meta_query(
                Relation::Or,
                vec![
                    MetaCondition::new("featured", CompareOp::Eq, json!(true)),
                    MetaCondition::new("price", CompareOp::Gt, json!(100)),
                ],
            ),
        )
        .await;
        assert_eq!(slugs(&output), vec!["both", "featured", "pricey"]);

        let and = run(
            &db,
            ListScope::All,
            ListRequest::new().meta_query(
                Relation::Or,
                vec![
                    MetaCondition::new("featured", CompareOp::Eq, json!(true)),
                    MetaCondition::new("price", CompareOp::Gt, json!(100)).relation(Relation::And),
                ],
            ),
        )
        .await;
        assert_eq!(slugs(&and), vec!["both"]);
    }

    #[tokio::test]
    async fn test_like_between_and_negations() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        seed_post(&db, "a", "draft", json!({"sku": "ABC-1", "price": 5})).await;
        seed_post(&db, "b", "draft", json!({"sku": "XYZ-2", "price": 50})).await;
        seed_post(&db, "c", "draft", json!({"sku": "ABD-3", "price": 500})).await;

        let like = run(
            &db,
            ListScope::All,
            ListRequest::new().meta_query(Relation::And, vec![MetaCondition::new("sku", CompareOp::Like, json!("AB"))]),
        )
        .await;
        assert_eq!(slugs(&like), vec!["a", "c"]);

        let between = run(
            &db,
            ListScope::All,
            ListRequest::new().meta_query(
                Relation::And,
                vec![MetaCondition::new("price", CompareOp::Between, json!([10, 100]))],
            ),
        )
        .await;
        assert_eq!(slugs(&between), vec!["b"]);

        let not_in = run(
            &db,
            ListScope::All,
            ListRequest::new().meta_query(
                Relation::And,
                vec![MetaCondition::new("price", CompareOp::NotIn, json!([5, 500]))],
            ),
        )
        .await;
        assert_eq!(slugs(&not_in), vec!["b"]);
    }

    #[tokio::test]
    async fn test_numeric_ranges_skip_text_values() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        seed_post(&db, "numeric-string", "draft", json!({"price": "50"})).await;
        seed_post(&db, "text", "draft", json!({"price": "n/a"})).await;
        seed_post(&db, "cheap", "draft", json!({"price": 20})).await;
        seed_post(&db, "pricey", "draft", json!({"price": 150.5})).await;

        let price = |compare, value| {
            ListRequest::new().meta_query(Relation::And, vec![MetaCondition::new("price", compare, value)])
        };

        let above = run(&db, ListScope::All, price(CompareOp::Gt, json!(100))).await;
        assert_eq!(slugs(&above), vec!["pricey"]);

        let below = run(&db, ListScope::All, price(CompareOp::Lte, json!(100))).await;
        assert_eq!(slugs(&below), vec!["cheap"]);

        let outside = run(&db, ListScope::All, price(CompareOp::NotBetween, json!([10, 100]))).await;
        assert_eq!(slugs(&outside), vec!["pricey"]);

        let text_range = run(&db, ListScope::All, price(CompareOp::Gte, json!("n"))).await;
        assert_eq!(slugs(&text_range), vec!["text"]);
    }

    #[tokio::test]
    async fn test_core_filter_list_with_null() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        seed_post(&db, "a", "draft", json!({})).await;
        seed_post(&db, "b", "draft", json!({})).await;
        sqlx::query(
            "INSERT INTO posts (type_slug, slug, created_at, updated_at) VALUES ('product', 'untitled', 'now', 'now')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let mixed = run(&db, ListScope::All, ListRequest::new().filter("title", json!([null, "A"]))).await;
        assert_eq!(slugs(&mixed), vec!["a", "untitled"]);

        let several = run(&db, ListScope::All, ListRequest::new().filter("title", json!(["A", null, "B"]))).await;
        assert_eq!(slugs(&several), vec!["a", "b", "untitled"]);

        let only_nulls = run(&db, ListScope::All, ListRequest::new().filter("title", json!([null, null]))).await;
        assert_eq!(slugs(&only_nulls), vec!["untitled"]);
    }

    #[tokio::test]
    async fn test_counts_are_filter_independent() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        seed_post(&db, "p1", "published", json!({})).await;
        seed_post(&db, "p2", "published", json!({})).await;
        seed_post(&db, "d1", "draft", json!({})).await;
        let trashed = seed_post(&db, "t1", "published", json!({})).await;
        let mut tx = db.begin_transaction().await.unwrap();
        EntityStore::soft_delete(tx.conn(), EntityKind::Post, trashed).await.unwrap();
        tx.commit().await.unwrap();

        let output = run(&db, ListScope::All, ListRequest::new().filter("status", json!("draft"))).await;
        assert_eq!(slugs(&output), vec!["d1"]);
        assert_eq!(output.total, 3);
        assert_eq!(output.total_current, 1);
        assert_eq!(output.total_trash, 1);
        assert_eq!(output.status_totals["published"], 2);
        assert_eq!(output.status_totals["draft"], 1);

        let trash = run(&db, ListScope::All, ListRequest::new().trashed(true)).await;
        assert_eq!(slugs(&trash), vec!["t1"]);

        let either = run(
            &db,
            ListScope::All,
            ListRequest::new().filter("status", json!(["draft", "published"])),
        )
        .await;
        assert_eq!(either.total_current, 3);
    }

    #[tokio::test]
    async fn test_pagination_and_ordering() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        for slug in ["a", "b", "c", "d"] {
            seed_post(&db, slug, "draft", json!({})).await;
        }

        let newest = run(&db, ListScope::All, ListRequest::new().page(2, 0)).await;
        assert_eq!(
            newest.rows.iter().map(|r| r.slug.as_str()).collect::<Vec<_>>(),
            vec!["d", "c"]
        );
        assert_eq!(newest.total_current, 4);

        let by_slug = run(
            &db,
            ListScope::All,
            ListRequest::new().order_by("slug", SortOrder::Asc).page(2, 1),
        )
        .await;
        assert_eq!(
            by_slug.rows.iter().map(|r| r.slug.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    #[tokio::test]
    async fn test_scopes() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let mine = seed_post(&db, "mine", "draft", json!({})).await;
        seed_post(&db, "theirs", "draft", json!({})).await;
        let mut tx = db.begin_transaction().await.unwrap();
        OwnershipStore::record_touch(tx.conn(), EntityKind::Post, mine, 7).await.unwrap();
        tx.commit().await.unwrap();

        let owned = run(&db, ListScope::OwnedBy(7), ListRequest::new()).await;
        assert_eq!(slugs(&owned), vec!["mine"]);
        assert_eq!(owned.total, 1);

        let nothing = run(&db, ListScope::Nothing, ListRequest::new()).await;
        assert!(nothing.rows.is_empty());
        assert_eq!(nothing.total, 0);
    }

    #[tokio::test]
    async fn test_taxonomy_and_search() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let tagged = seed_post(&db, "tagged", "draft", json!({"subtitle": "nothing"})).await;
        seed_post(&db, "plain", "draft", json!({"subtitle": "hidden gem"})).await;
        sqlx::query(
            "INSERT INTO terms (id, type_slug, slug, name, created_at, updated_at) \
             VALUES (50, 'category', 'news', 'News', 'now', 'now')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        let mut tx = db.begin_transaction().await.unwrap();
        RelationshipStore::replace(tx.conn(), tagged, &[50].into_iter().collect()).await.unwrap();
        tx.commit().await.unwrap();

        let by_id = run(&db, ListScope::All, ListRequest::new().taxonomy("category", 50i64)).await;
        assert_eq!(slugs(&by_id), vec!["tagged"]);
        let by_slug = run(&db, ListScope::All, ListRequest::new().taxonomy("category", "news")).await;
        assert_eq!(slugs(&by_slug), vec!["tagged"]);
        let wrong_taxonomy = run(&db, ListScope::All, ListRequest::new().taxonomy("tag", 50i64)).await;
        assert!(wrong_taxonomy.rows.is_empty());

        let meta_search = run(&db, ListScope::All, ListRequest::new().search("gem", &["title"], &["subtitle"])).await;
        assert_eq!(slugs(&meta_search), vec!["plain"]);
        let title_search = run(&db, ListScope::All, ListRequest::new().search("TAGG", &[], &[])).await;
        assert_eq!(slugs(&title_search), vec!["tagged"]);
    }

    #[test]
    fn test_validation() {
        let config = QueryConfig::default();
        let compile = |kind, request: ListRequest| {
            QueryPlan::compile(kind, "x", ListScope::All, &request, &config)
        };

        assert!(matches!(
            compile(EntityKind::Post, ListRequest::new().filter("password", json!("x"))),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            compile(EntityKind::Post, ListRequest::new().order_by("1; DROP TABLE posts", SortOrder::Asc)),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            compile(EntityKind::Term, ListRequest::new().taxonomy("category", 1i64)),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            compile(EntityKind::Post, ListRequest::new().page(0, 0)),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            compile(
                EntityKind::Post,
                ListRequest::new().meta_query(
                    Relation::And,
                    vec![MetaCondition::new("price", CompareOp::Between, json!([1]))]
                )
            ),
            Err(AppError::Validation(_))
        ));

        let clamped = compile(EntityKind::Post, ListRequest::new().page(5000, 0)).unwrap();
        assert_eq!(clamped.limit, 100);
        let defaulted = compile(EntityKind::Post, ListRequest::new()).unwrap();
        assert_eq!(defaulted.limit, 10);
    }

    #[test]
    fn test_caller_values_are_bound() {
        let plan = QueryPlan::compile(
            EntityKind::Post,
            "product'; --",
            ListScope::All,
            &ListRequest::new().meta_query(
                Relation::And,
                vec![MetaCondition::new("color'", CompareOp::Eq, json!("red'"))],
            ),
            &QueryConfig::default(),
        )
        .unwrap();
        let qb = plan.rows_query();
        let sql = qb.sql();
        assert!(!sql.contains("product'"));
        assert!(!sql.contains("red'"));
        assert!(sql.contains("json_extract"));
    }
}
