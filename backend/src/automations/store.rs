// Definition and execution storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_shared::{AutomationDefinition, Node};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::warn;
use uuid::Uuid;

use super::executor::ExecutionContext;

/// Read access to automation definitions. The engine only ever reads;
/// writes happen through the host API on the concrete store.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn find_active(&self) -> Result<Vec<AutomationDefinition>, sqlx::Error>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AutomationDefinition>, sqlx::Error>;
}

/// Lifecycle of one execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Execution bookkeeping: one row per run, moved through
/// running -> suspended -> running -> completed | failed.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_running(&self, ctx: &ExecutionContext) -> Result<(), sqlx::Error>;
    async fn mark_running(&self, ctx: &ExecutionContext) -> Result<(), sqlx::Error>;
    async fn mark_suspended(&self, ctx: &ExecutionContext) -> Result<(), sqlx::Error>;
    async fn mark_completed(&self, ctx: &ExecutionContext) -> Result<(), sqlx::Error>;
    async fn mark_failed(&self, ctx: &ExecutionContext, error: &str) -> Result<(), sqlx::Error>;
}

/// One row of execution history returned to the host API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub status: String,
    pub context: serde_json::Value,
    pub logs: serde_json::Value,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

type DefinitionRow = (
    Uuid,
    String,
    Option<String>,
    bool,
    serde_json::Value,
    Option<Uuid>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

const DEFINITION_COLUMNS: &str =
    "id, name, description, is_active, nodes, created_by, created_at, updated_at";

#[derive(Clone)]
pub struct PgDefinitionStore {
    pool: PgPool,
}

impl PgDefinitionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: DefinitionRow) -> Option<AutomationDefinition> {
        let nodes: Vec<Node> = match serde_json::from_value(row.4) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(automation_id = %row.0, error = %e, "skipping automation with undecodable node graph");
                return None;
            }
        };
        Some(AutomationDefinition {
            id: row.0,
            name: row.1,
            description: row.2,
            is_active: row.3,
            nodes,
            created_by: row.5,
            created_at: row.6,
            updated_at: row.7,
        })
    }

    pub async fn list_all(&self) -> Result<Vec<AutomationDefinition>, sqlx::Error> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM automations ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(Self::decode).collect())
    }

    pub async fn create(&self, definition: &AutomationDefinition) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO automations
            (id, name, description, is_active, nodes, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(definition.id)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(definition.is_active)
        .bind(Json(&definition.nodes))
        .bind(definition.created_by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update a definition in place. Returns false if the id does not exist.
    pub async fn update(&self, definition: &AutomationDefinition) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE automations
            SET name = $2, description = $3, is_active = $4, nodes = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(definition.id)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(definition.is_active)
        .bind(Json(&definition.nodes))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_active(&self, id: Uuid, is_active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE automations SET is_active = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(is_active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM automations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DefinitionStore for PgDefinitionStore {
    async fn find_active(&self) -> Result<Vec<AutomationDefinition>, sqlx::Error> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM automations WHERE is_active = true ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(Self::decode).collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AutomationDefinition>, sqlx::Error> {
        let row: Option<DefinitionRow> = sqlx::query_as(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM automations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(Self::decode))
    }
}

#[derive(Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_status(
        &self,
        ctx: &ExecutionContext,
        status: ExecutionStatus,
        error: Option<&str>,
        terminal: bool,
    ) -> Result<(), sqlx::Error> {
        let completed_at = if terminal { "NOW()" } else { "NULL" };
        let query = format!(
            r#"
            UPDATE automation_executions
            SET status = $2, context = $3, logs = $4, error_message = $5, completed_at = {completed_at}
            WHERE id = $1
            "#,
        );
        sqlx::query(&query)
            .bind(ctx.execution_id)
            .bind(status.as_str())
            .bind(Json(&ctx.data))
            .bind(Json(&ctx.logs))
            .bind(error)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn history(
        &self,
        automation_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>, sqlx::Error> {
        type Row = (
            Uuid,
            Uuid,
            String,
            serde_json::Value,
            serde_json::Value,
            Option<String>,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
        );

        let mut query = String::from(
            "SELECT id, automation_id, status, context, logs, error_message, started_at, completed_at
             FROM automation_executions",
        );
        if automation_id.is_some() {
            query.push_str(" WHERE automation_id = $1");
        }
        query.push_str(" ORDER BY started_at DESC LIMIT ");
        query.push_str(&limit.to_string());

        let rows: Vec<Row> = if let Some(id) = automation_id {
            sqlx::query_as(&query).bind(id).fetch_all(&self.pool).await?
        } else {
            sqlx::query_as(&query).fetch_all(&self.pool).await?
        };

        Ok(rows
            .into_iter()
            .map(|row| ExecutionRecord {
                id: row.0,
                automation_id: row.1,
                status: row.2,
                context: row.3,
                logs: row.4,
                error_message: row.5,
                started_at: row.6,
                completed_at: row.7,
            })
            .collect())
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create_running(&self, ctx: &ExecutionContext) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO automation_executions
            (id, automation_id, status, context, logs, started_at)
            VALUES ($1, $2, 'running', $3, $4, NOW())
            "#,
        )
        .bind(ctx.execution_id)
        .bind(ctx.automation_id)
        .bind(Json(&ctx.data))
        .bind(Json(&ctx.logs))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_running(&self, ctx: &ExecutionContext) -> Result<(), sqlx::Error> {
        self.set_status(ctx, ExecutionStatus::Running, None, false).await
    }

    async fn mark_suspended(&self, ctx: &ExecutionContext) -> Result<(), sqlx::Error> {
        self.set_status(ctx, ExecutionStatus::Suspended, None, false).await
    }

    async fn mark_completed(&self, ctx: &ExecutionContext) -> Result<(), sqlx::Error> {
        self.set_status(ctx, ExecutionStatus::Completed, None, true).await
    }

    async fn mark_failed(&self, ctx: &ExecutionContext, error: &str) -> Result<(), sqlx::Error> {
        self.set_status(ctx, ExecutionStatus::Failed, Some(error), true).await
    }
}
