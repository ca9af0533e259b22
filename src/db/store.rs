//! Postgres storage backend
//!
//! Resources are stored one row per version in a `resources` table with
//! the body in a jsonb column. Query fragments lower to EXISTS
//! subqueries over `jsonb_path_query`; lax jsonpath evaluation unwraps
//! arrays, so a path like `name.family` matches any element of `name`.
//! All request values travel as bind parameters; the jsonpaths embedded
//! in the SQL come from the static registry, never from the request.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres};

use crate::db::search::fragment::{
    QueryFragment, SortKey, SortTarget, StoreQuery,
};
use crate::db::traits::{ResourceStore, ResourceTransaction, TransactionContext};
use crate::models::fhir::Resource;
use crate::{Error, Result};

type ResourceRow = (String, String, i32, JsonValue, DateTime<Utc>, bool);

fn row_to_resource(row: ResourceRow) -> Resource {
    let (id, resource_type, version_id, resource, last_updated, deleted) = row;
    Resource {
        id,
        resource_type,
        version_id,
        resource,
        last_updated,
        deleted,
    }
}

const SELECT_COLUMNS: &str = "id, resource_type, version_id, resource, last_updated, deleted";

#[derive(Clone)]
pub struct PostgresResourceStore {
    pool: PgPool,
}

impl PostgresResourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Append a version: retire the current row, insert the new one. Runs
/// on a connection so it composes with an enclosing transaction.
async fn insert_version_on(conn: &mut PgConnection, tenant: &str, r: &Resource) -> Result<()> {
    sqlx::query(
        "UPDATE resources SET is_current = false \
         WHERE tenant_id = $1 AND resource_type = $2 AND id = $3 AND is_current",
    )
    .bind(tenant)
    .bind(&r.resource_type)
    .bind(&r.id)
    .execute(&mut *conn)
    .await?;

    let result = sqlx::query(
        "INSERT INTO resources \
         (tenant_id, resource_type, id, version_id, resource, last_updated, deleted, is_current) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, true)",
    )
    .bind(tenant)
    .bind(&r.resource_type)
    .bind(&r.id)
    .bind(r.version_id)
    .bind(&r.resource)
    .bind(r.last_updated)
    .bind(r.deleted)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(Error::VersionConflict(format!(
                "version {} already stored for {}/{}",
                r.version_id, r.resource_type, r.id
            )))
        }
        Err(e) => Err(e.into()),
    }
}

async fn read_head_on(
    conn: &mut PgConnection,
    tenant: &str,
    resource_type: &str,
    id: &str,
) -> Result<Option<Resource>> {
    let row: Option<ResourceRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM resources \
         WHERE tenant_id = $1 AND resource_type = $2 AND id = $3 AND is_current"
    ))
    .bind(tenant)
    .bind(resource_type)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(row_to_resource))
}

#[async_trait]
impl ResourceStore for PostgresResourceStore {
    async fn read(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Resource>> {
        Ok(self
            .read_head(tenant, resource_type, id)
            .await?
            .filter(|r| !r.deleted))
    }

    async fn read_head(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Resource>> {
        let mut conn = self.pool.acquire().await?;
        read_head_on(&mut conn, tenant, resource_type, id).await
    }

    async fn read_version(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
        version_id: i32,
    ) -> Result<Option<Resource>> {
        let row: Option<ResourceRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM resources \
             WHERE tenant_id = $1 AND resource_type = $2 AND id = $3 AND version_id = $4"
        ))
        .bind(tenant)
        .bind(resource_type)
        .bind(id)
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_resource))
    }

    async fn history(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<Resource>> {
        let rows: Vec<ResourceRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM resources \
             WHERE tenant_id = $1 AND resource_type = $2 AND id = $3 \
             ORDER BY version_id DESC"
        ))
        .bind(tenant)
        .bind(resource_type)
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_resource).collect())
    }

    async fn insert_version(&self, tenant: &str, resource: &Resource) -> Result<()> {
        // Two statements, so they get their own transaction
        let mut tx = self.pool.begin().await?;
        insert_version_on(&mut tx, tenant, resource).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn execute_search(&self, tenant: &str, query: &StoreQuery) -> Result<Vec<Resource>> {
        let lowered = lower_search(tenant, query);
        tracing::debug!(sql = %lowered.sql, "executing search");
        let mut q = sqlx::query_as::<_, ResourceRow>(&lowered.sql);
        for bind in &lowered.binds {
            q = q.bind(bind);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(row_to_resource).collect())
    }

    async fn execute_count(&self, tenant: &str, query: &StoreQuery) -> Result<i64> {
        let lowered = lower_count(tenant, query);
        tracing::debug!(sql = %lowered.sql, "executing count");
        let mut q = sqlx::query_scalar::<_, i64>(&lowered.sql);
        for bind in &lowered.binds {
            q = q.bind(bind);
        }
        Ok(q.fetch_one(&self.pool).await?)
    }
}

pub struct PostgresTransactionContext {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl ResourceTransaction for PostgresResourceStore {
    type Context = PostgresTransactionContext;

    async fn begin_transaction(&self) -> Result<Self::Context> {
        Ok(PostgresTransactionContext {
            tx: self.pool.begin().await?,
        })
    }
}

#[async_trait]
impl TransactionContext for PostgresTransactionContext {
    async fn read_head(
        &mut self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Resource>> {
        read_head_on(&mut self.tx, tenant, resource_type, id).await
    }

    async fn insert_version(&mut self, tenant: &str, resource: &Resource) -> Result<()> {
        insert_version_on(&mut self.tx, tenant, resource).await
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ---- StoreQuery lowering ----

struct LoweredQuery {
    sql: String,
    binds: Vec<String>,
}

fn lower_search(tenant: &str, query: &StoreQuery) -> LoweredQuery {
    let mut binds = vec![tenant.to_string(), query.resource_type.clone()];
    let where_clause = where_clause(query, &mut binds);
    let order = order_clause(&query.sort);
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM resources r \
         WHERE {where_clause} {order} LIMIT {} OFFSET {}",
        query.count, query.offset
    );
    LoweredQuery { sql, binds }
}

fn lower_count(tenant: &str, query: &StoreQuery) -> LoweredQuery {
    let mut binds = vec![tenant.to_string(), query.resource_type.clone()];
    let where_clause = where_clause(query, &mut binds);
    let sql = format!("SELECT COUNT(*) FROM resources r WHERE {where_clause}");
    LoweredQuery { sql, binds }
}

fn where_clause(query: &StoreQuery, binds: &mut Vec<String>) -> String {
    let mut clauses = vec![
        "r.tenant_id = $1".to_string(),
        "r.resource_type = $2".to_string(),
        "r.is_current".to_string(),
    ];
    for fragment in &query.must {
        clauses.push(fragment_sql(fragment, binds));
    }
    if !query.must_not.is_empty() {
        let excluded: Vec<String> = query
            .must_not
            .iter()
            .map(|f| fragment_sql(f, binds))
            .collect();
        clauses.push(format!("NOT ({})", excluded.join(" OR ")));
    }
    clauses.join(" AND ")
}

fn fragment_sql(fragment: &QueryFragment, binds: &mut Vec<String>) -> String {
    match fragment {
        QueryFragment::Term { path, value } | QueryFragment::Exact { path, value } => {
            binds.push(value.clone());
            path_exists(path, &format!("v #>> '{{}}' = ${}", binds.len()))
        }
        // Bind values arrive already folded (lowercase, diacritics
        // stripped); unaccent folds the stored side to match.
        QueryFragment::Prefix { path, value } => {
            binds.push(format!("{}%", escape_like(value)));
            path_exists(
                path,
                &format!(
                    "lower(unaccent(v #>> '{{}}')) LIKE ${} ESCAPE '\\'",
                    binds.len()
                ),
            )
        }
        QueryFragment::Contains { path, value } => {
            binds.push(format!("%{}%", escape_like(value)));
            path_exists(
                path,
                &format!(
                    "lower(unaccent(v #>> '{{}}')) LIKE ${} ESCAPE '\\'",
                    binds.len()
                ),
            )
        }
        QueryFragment::DateRange {
            path,
            start,
            start_inclusive,
            end,
            end_inclusive,
        } => {
            let mut conditions = Vec::new();
            if let Some(start) = start {
                binds.push(start.to_rfc3339_opts(SecondsFormat::Secs, true));
                let op = if *start_inclusive { ">=" } else { ">" };
                conditions.push(format!(
                    "(v #>> '{{}}')::timestamptz {op} ${}::timestamptz",
                    binds.len()
                ));
            }
            if let Some(end) = end {
                binds.push(end.to_rfc3339_opts(SecondsFormat::Secs, true));
                let op = if *end_inclusive { "<=" } else { "<" };
                conditions.push(format!(
                    "(v #>> '{{}}')::timestamptz {op} ${}::timestamptz",
                    binds.len()
                ));
            }
            path_exists(path, &conditions.join(" AND "))
        }
        QueryFragment::NumberRange {
            path,
            low,
            low_inclusive,
            high,
            high_inclusive,
        } => {
            let mut conditions = Vec::new();
            if let Some(low) = low {
                binds.push(low.to_string());
                let op = if *low_inclusive { ">=" } else { ">" };
                conditions.push(format!(
                    "(v #>> '{{}}')::numeric {op} ${}::numeric",
                    binds.len()
                ));
            }
            if let Some(high) = high {
                binds.push(high.to_string());
                let op = if *high_inclusive { "<=" } else { "<" };
                conditions.push(format!(
                    "(v #>> '{{}}')::numeric {op} ${}::numeric",
                    binds.len()
                ));
            }
            path_exists(path, &conditions.join(" AND "))
        }
        QueryFragment::Missing { path } => format!(
            "NOT EXISTS (SELECT 1 FROM jsonb_path_query(r.resource, '$.{path}') v \
             WHERE v #>> '{{}}' <> '')"
        ),
        QueryFragment::Tombstone => "r.deleted = true".to_string(),
        QueryFragment::Conjunction(parts) => {
            if parts.is_empty() {
                return "TRUE".to_string();
            }
            let sub: Vec<String> = parts.iter().map(|f| fragment_sql(f, binds)).collect();
            format!("({})", sub.join(" AND "))
        }
        QueryFragment::Disjunction(parts) => {
            if parts.is_empty() {
                return "FALSE".to_string();
            }
            let sub: Vec<String> = parts.iter().map(|f| fragment_sql(f, binds)).collect();
            format!("({})", sub.join(" OR "))
        }
    }
}

fn path_exists(path: &str, condition: &str) -> String {
    format!(
        "EXISTS (SELECT 1 FROM jsonb_path_query(r.resource, '$.{path}') v WHERE {condition})"
    )
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn order_clause(sort: &[SortKey]) -> String {
    if sort.is_empty() {
        return "ORDER BY r.last_updated DESC, r.id DESC".to_string();
    }
    let keys: Vec<String> = sort
        .iter()
        .map(|key| {
            let direction = if key.ascending { "ASC" } else { "DESC" };
            match &key.target {
                SortTarget::LastUpdated => format!("r.last_updated {direction}"),
                SortTarget::Id => format!("r.id {direction}"),
                SortTarget::Path(path) => format!(
                    "(SELECT MIN(v #>> '{{}}') FROM jsonb_path_query(r.resource, '$.{path}') v) \
                     {direction} NULLS LAST"
                ),
            }
        })
        .collect();
    format!("ORDER BY {}", keys.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::search::{compile, params::SearchParameters};

    fn compile_for(pairs: &[(&str, &str)]) -> StoreQuery {
        let items: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let params = SearchParameters::from_items(&items).unwrap();
        compile("Patient", &params).unwrap()
    }

    #[test]
    fn search_sql_scopes_tenant_and_type() {
        let q = compile_for(&[("gender", "male")]);
        let lowered = lower_search("tenant-a", &q);
        assert!(lowered.sql.starts_with("SELECT"));
        assert!(lowered.sql.contains("r.tenant_id = $1"));
        assert!(lowered.sql.contains("r.resource_type = $2"));
        assert!(lowered.sql.contains("r.is_current"));
        assert_eq!(lowered.binds[0], "tenant-a");
        assert_eq!(lowered.binds[1], "Patient");
        assert_eq!(lowered.binds[2], "male");
    }

    #[test]
    fn tombstones_excluded_via_must_not() {
        let q = compile_for(&[]);
        let lowered = lower_search("t", &q);
        assert!(lowered.sql.contains("NOT (r.deleted = true)"));
    }

    #[test]
    fn values_are_bound_not_inlined() {
        let q = compile_for(&[("name", "Robert'); DROP TABLE resources;--")]);
        let lowered = lower_search("t", &q);
        assert!(!lowered.sql.contains("DROP TABLE"));
        assert!(lowered.binds.iter().any(|b| b.contains("drop table")));
    }

    #[test]
    fn like_wildcards_in_values_are_escaped() {
        let q = compile_for(&[("name", "100%")]);
        let lowered = lower_search("t", &q);
        assert!(lowered.binds.iter().any(|b| b == "100\\%%"));
    }

    #[test]
    fn string_match_folds_the_stored_side() {
        let q = compile_for(&[("name", "rené")]);
        let lowered = lower_search("t", &q);
        assert!(lowered.sql.contains("lower(unaccent(v #>> '{}')) LIKE"));
        // The bind itself is already folded
        assert!(lowered.binds.iter().any(|b| b == "rene%"));
    }

    #[test]
    fn empty_system_token_lowers_to_not_exists() {
        let q = compile_for(&[("identifier", "|12345")]);
        let lowered = lower_search("t", &q);
        assert!(lowered
            .sql
            .contains("NOT EXISTS (SELECT 1 FROM jsonb_path_query(r.resource, '$.identifier.system') v"));
        assert!(lowered.binds.iter().any(|b| b == "12345"));
    }

    #[test]
    fn date_range_binds_both_bounds() {
        let q = compile_for(&[("birthdate", "1980")]);
        let lowered = lower_search("t", &q);
        assert!(lowered.sql.contains("::timestamptz >= $3::timestamptz"));
        assert!(lowered.sql.contains("::timestamptz < $4::timestamptz"));
        assert_eq!(lowered.binds[2], "1980-01-01T00:00:00Z");
        assert_eq!(lowered.binds[3], "1981-01-01T00:00:00Z");
    }

    #[test]
    fn count_sql_has_no_paging() {
        let q = compile_for(&[("_count", "5")]);
        let lowered = lower_count("t", &q);
        assert!(lowered.sql.starts_with("SELECT COUNT(*)"));
        assert!(!lowered.sql.contains("LIMIT"));
    }

    #[test]
    fn default_order_is_newest_first() {
        let q = compile_for(&[]);
        let lowered = lower_search("t", &q);
        assert!(lowered
            .sql
            .contains("ORDER BY r.last_updated DESC, r.id DESC"));
    }

    #[test]
    fn sort_on_document_path_uses_jsonpath() {
        let q = compile_for(&[("_sort", "family")]);
        let lowered = lower_search("t", &q);
        assert!(lowered.sql.contains("'$.name.family'"));
        assert!(lowered.sql.contains("ASC NULLS LAST"));
    }
}
