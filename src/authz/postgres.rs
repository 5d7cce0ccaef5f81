use async_trait::async_trait;
use sea_orm::sea_query::ArrayType;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, ExecResult, IsolationLevel, QueryResult,
    Statement, TransactionTrait, Value,
};

use crate::authz::context::RequestContext;
use crate::authz::errors::AuthzError;
use crate::authz::store::{RelationStore, StoreTransaction};
use crate::authz::types::{Object, Relationship, TraversalRequest, TraversalResponseItem};

/// PostgreSQL relation store. Writes are single-statement bulk operations;
/// traversal is one recursive query that accumulates each walk as a JSON
/// array of edge records in storage orientation.
pub struct PgRelationStore {
    db: DatabaseConnection,
}

impl PgRelationStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Runs a statement on the context's ambient transaction when present,
    /// the pool otherwise, racing the request's cancellation token.
    async fn execute(
        &self,
        ctx: &RequestContext<'_>,
        stmt: Statement,
    ) -> Result<ExecResult, AuthzError> {
        tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(AuthzError::Cancelled),
            result = async {
                match ctx.transaction() {
                    Some(txn) => txn.execute(stmt).await,
                    None => self.db.execute(stmt).await,
                }
            } => Ok(result?),
        }
    }

    async fn query_all(
        &self,
        ctx: &RequestContext<'_>,
        stmt: Statement,
    ) -> Result<Vec<QueryResult>, AuthzError> {
        tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(AuthzError::Cancelled),
            result = async {
                match ctx.transaction() {
                    Some(txn) => txn.query_all(stmt).await,
                    None => self.db.query_all(stmt).await,
                }
            } => Ok(result?),
        }
    }
}

/// "($1, $2, $3, $4, $5), ($6, ...)" for `count` 5-column tuples.
fn tuple_placeholders(count: usize) -> String {
    (0..count)
        .map(|i| {
            let n = i * 5 + 1;
            format!("(${}, ${}, ${}, ${}, ${})", n, n + 1, n + 2, n + 3, n + 4)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn tuple_values(relationships: &[Relationship]) -> Vec<Value> {
    let mut values = Vec::with_capacity(relationships.len() * 5);
    for rel in relationships {
        values.push(rel.resource.id.clone().into());
        values.push(rel.resource.object_type.clone().into());
        values.push(rel.subject.id.clone().into());
        values.push(rel.subject.object_type.clone().into());
        values.push(rel.relation.clone().into());
    }
    values
}

/// The recursive traversal query. The traversal direction fixes which column
/// pair is the near end (seed and join side) and which is the far end; edge
/// records are always emitted in storage orientation.
fn traversal_sql(forward: bool) -> String {
    let (near, far) = if forward {
        ("resource", "subject")
    } else {
        ("subject", "resource")
    };
    format!(
        r#"WITH RECURSIVE rel_tree AS (
    SELECT
        r.{near}_type AS start_type,
        r.{near}_id   AS start_id,
        r.{far}_type  AS next_type,
        r.{far}_id    AS next_id,
        json_build_array(
            json_build_object(
                'resource', r.resource_type || ':' || r.resource_id,
                'subject',  r.subject_type  || ':' || r.subject_id,
                'relation', r.relation
            )
        )::jsonb AS path
    FROM relationship r
    WHERE r.{near}_type = $1 AND r.{near}_id = $2

    UNION ALL

    SELECT
        t.start_type,
        t.start_id,
        r.{far}_type AS next_type,
        r.{far}_id   AS next_id,
        t.path || json_build_object(
            'resource', r.resource_type || ':' || r.resource_id,
            'subject',  r.subject_type  || ':' || r.subject_id,
            'relation', r.relation
        )::jsonb
    FROM relationship r
    JOIN rel_tree t
      ON r.{near}_id = t.next_id AND r.{near}_type = t.next_type
    WHERE ($3::text[] IS NULL OR NOT (t.next_type = ANY($3::text[])))
)
SELECT
    start_type,
    start_id,
    next_type,
    next_id,
    json_agg(path) AS paths
FROM rel_tree
WHERE (($4 = '' AND $5 = '') OR (next_type = $4 AND next_id = $5))
  AND ($3::text[] IS NULL OR next_type = ANY($3::text[]))
GROUP BY start_type, start_id, next_type, next_id"#
    )
}

#[async_trait]
impl RelationStore for PgRelationStore {
    async fn insert_bulk(
        &self,
        ctx: &RequestContext<'_>,
        relationships: &[Relationship],
    ) -> Result<(), AuthzError> {
        if relationships.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "INSERT INTO relationship (resource_id, resource_type, subject_id, subject_type, relation) \
             VALUES {} ON CONFLICT DO NOTHING",
            tuple_placeholders(relationships.len())
        );
        self.execute(
            ctx,
            Statement::from_sql_and_values(DbBackend::Postgres, sql, tuple_values(relationships)),
        )
        .await?;
        Ok(())
    }

    async fn delete_bulk(
        &self,
        ctx: &RequestContext<'_>,
        relationships: &[Relationship],
    ) -> Result<(), AuthzError> {
        if relationships.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "DELETE FROM relationship \
             WHERE (resource_id, resource_type, subject_id, subject_type, relation) IN ({})",
            tuple_placeholders(relationships.len())
        );
        self.execute(
            ctx,
            Statement::from_sql_and_values(DbBackend::Postgres, sql, tuple_values(relationships)),
        )
        .await?;
        Ok(())
    }

    async fn list_paths(
        &self,
        ctx: &RequestContext<'_>,
        request: &TraversalRequest,
    ) -> Result<Vec<TraversalResponseItem>, AuthzError> {
        let stop_types = if request.stop_on_types.is_empty() {
            Value::Array(ArrayType::String, None)
        } else {
            Value::Array(
                ArrayType::String,
                Some(Box::new(
                    request
                        .stop_on_types
                        .iter()
                        .map(|t| Value::from(t.clone()))
                        .collect(),
                )),
            )
        };
        let (stop_type, stop_id) = match &request.stop_on {
            Some(stop_on) => (stop_on.object_type.clone(), stop_on.id.clone()),
            None => (String::new(), String::new()),
        };
        let values: Vec<Value> = vec![
            request.start_on.object_type.clone().into(),
            request.start_on.id.clone().into(),
            stop_types,
            stop_type.into(),
            stop_id.into(),
        ];

        let rows = self
            .query_all(
                ctx,
                Statement::from_sql_and_values(
                    DbBackend::Postgres,
                    traversal_sql(request.forward),
                    values,
                ),
            )
            .await?;

        let mut response = Vec::with_capacity(rows.len());
        for row in rows {
            let start_type: String = row.try_get("", "start_type")?;
            let start_id: String = row.try_get("", "start_id")?;
            let next_type: String = row.try_get("", "next_type")?;
            let next_id: String = row.try_get("", "next_id")?;
            let raw_paths: serde_json::Value = row.try_get("", "paths")?;
            let paths: Vec<Vec<Relationship>> = serde_json::from_value(raw_paths)
                .map_err(|e| AuthzError::Internal(format!("malformed traversal payload: {e}")))?;

            let start = Object::new(start_type, start_id);
            let next = Object::new(next_type, next_id);
            let (resource, subject) = if request.forward {
                (start, next)
            } else {
                (next, start)
            };
            response.push(TraversalResponseItem {
                resource,
                subject,
                paths,
            });
        }

        Ok(response)
    }

    async fn begin(&self, ctx: &RequestContext<'_>) -> Result<StoreTransaction, AuthzError> {
        if ctx.transaction().is_some() {
            return Ok(StoreTransaction::ambient());
        }
        let txn = self
            .db
            .begin_with_config(Some(IsolationLevel::ReadCommitted), None)
            .await?;
        Ok(StoreTransaction::owned(txn))
    }
}
