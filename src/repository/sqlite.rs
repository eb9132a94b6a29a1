/// SQLite persistence layer
///
/// Specifications and audit payloads are stored as JSON text, timestamps as RFC 3339
/// text. Status changes and their audit rows share one transaction.

use crate::audit::{AuditAction, AuditEvent, ExecutionPhase};
use crate::entitlement::{PlanStatus, Role};
use crate::error::{Result, TesseraError};
use crate::organization::{Member, Organization};
use crate::repository::{
    AuditRepository, DeploymentCommit, OrganizationRepository, SecretRepository, WorkflowRecord,
    WorkflowRepository, WorkflowStatus,
};
use crate::vault::{SecretRecord, SecretSummary};
use crate::workflow::WorkflowSpecification;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

const WORKFLOW_COLUMNS: &str = "w.id, w.organization_id, w.name, w.specification, w.status, \
     w.version, w.engine_workflow_id, w.trigger_url, w.created_by, w.created_at, w.updated_at";

const AUDIT_COLUMNS: &str = "id, parent_id, organization_id, workflow_id, action, actor_id, \
     payload, execution_id, timestamp";

const INSERT_AUDIT_SQL: &str = r#"
    INSERT INTO audit_events
        (id, parent_id, organization_id, workflow_id, action, actor_id, payload, execution_id, phase, timestamp)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const INSERT_EXECUTION_SQL: &str = r#"
    INSERT INTO audit_events
        (id, parent_id, organization_id, workflow_id, action, actor_id, payload, execution_id, phase, timestamp)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT DO NOTHING
"#;

/// SQLite-backed repository
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Connect using a URL such as `sqlite://data/tessera.db` and ensure the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Open (or create) a database file
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database; a single connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let repository = Self { pool };
        repository.init_schema().await?;
        Ok(repository)
    }

    /// Create tables and indexes. Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS organizations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                plan_status TEXT NOT NULL DEFAULT 'free',
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS members (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'viewer'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                specification TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                version INTEGER NOT NULL DEFAULT 1,
                engine_workflow_id TEXT,
                trigger_url TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                organization_id TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                workflow_id TEXT REFERENCES workflows(id) ON DELETE CASCADE,
                action TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                execution_id TEXT,
                phase TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                key_name TEXT NOT NULL,
                encrypted_value TEXT NOT NULL,
                iv TEXT NOT NULL,
                auth_tag TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (organization_id, key_name)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_workflows_org ON workflows(organization_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_workflow ON audit_events(workflow_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_parent ON audit_events(parent_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_org ON audit_events(organization_id)",
            // one event per phase of an execution; non-execution rows have NULL ids and never collide
            "DROP INDEX IF EXISTS idx_audit_execution",
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_audit_execution \
             ON audit_events(workflow_id, execution_id, phase)",
            "CREATE INDEX IF NOT EXISTS idx_secrets_org ON secrets(organization_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| TesseraError::Storage(sqlx::Error::Decode(Box::new(e))))
}

fn insert_audit_query(event: &AuditEvent) -> Result<Query<'static, Sqlite, SqliteArguments<'static>>> {
    audit_query(INSERT_AUDIT_SQL, event)
}

fn audit_query(
    sql: &'static str,
    event: &AuditEvent,
) -> Result<Query<'static, Sqlite, SqliteArguments<'static>>> {
    let payload = serde_json::to_string(&event.payload)?;
    Ok(sqlx::query(sql)
        .bind(event.id.clone())
        .bind(event.parent_id.clone())
        .bind(event.organization_id.clone())
        .bind(event.workflow_id.clone())
        .bind(event.action.as_str())
        .bind(event.actor_id.clone())
        .bind(payload)
        .bind(event.execution_id.clone())
        .bind(event.phase().map(|phase| phase.as_str()))
        .bind(timestamp(&event.timestamp)))
}

fn insert_secret_query(secret: &SecretRecord) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(
        r#"
        INSERT INTO secrets (id, organization_id, key_name, encrypted_value, iv, auth_tag, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&secret.id)
    .bind(&secret.organization_id)
    .bind(&secret.key_name)
    .bind(&secret.sealed.ciphertext)
    .bind(&secret.sealed.iv)
    .bind(&secret.sealed.tag)
    .bind(timestamp(&secret.created_at))
}

fn secret_write_error(err: sqlx::Error, key_name: &str) -> TesseraError {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            TesseraError::Conflict(format!("secret '{}' already exists", key_name))
        }
        other => other.into(),
    }
}

fn workflow_from_row(row: &SqliteRow) -> Result<WorkflowRecord> {
    let specification: String = row.try_get("specification")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(WorkflowRecord {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        name: row.try_get("name")?,
        specification: serde_json::from_str::<WorkflowSpecification>(&specification)?,
        status: status.parse()?,
        version: row.try_get("version")?,
        engine_workflow_id: row.try_get("engine_workflow_id")?,
        trigger_url: row.try_get("trigger_url")?,
        created_by: row.try_get("created_by")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn organization_from_row(row: &SqliteRow, prefix: &str) -> Result<Organization> {
    let plan_status: String = row.try_get(format!("{}plan_status", prefix).as_str())?;
    let created_at: String = row.try_get(format!("{}created_at", prefix).as_str())?;
    Ok(Organization {
        id: row.try_get(format!("{}id", prefix).as_str())?,
        name: row.try_get(format!("{}name", prefix).as_str())?,
        plan_status: PlanStatus::parse(&plan_status),
        created_at: parse_timestamp(&created_at)?,
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditEvent> {
    let action: String = row.try_get("action")?;
    let payload: String = row.try_get("payload")?;
    let recorded_at: String = row.try_get("timestamp")?;

    Ok(AuditEvent {
        id: row.try_get("id")?,
        parent_id: row.try_get("parent_id")?,
        organization_id: row.try_get("organization_id")?,
        workflow_id: row.try_get("workflow_id")?,
        action: AuditAction::parse(&action).ok_or_else(|| {
            TesseraError::Storage(sqlx::Error::Decode(
                format!("unknown audit action '{}'", action).into(),
            ))
        })?,
        actor_id: row.try_get("actor_id")?,
        payload: serde_json::from_str(&payload)?,
        execution_id: row.try_get("execution_id")?,
        timestamp: parse_timestamp(&recorded_at)?,
    })
}

#[async_trait]
impl WorkflowRepository for SqliteRepository {
    async fn insert_workflow(&self, workflow: &WorkflowRecord, event: &AuditEvent) -> Result<()> {
        let specification = serde_json::to_string(&workflow.specification)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, organization_id, name, specification, status, version,
                 engine_workflow_id, trigger_url, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.organization_id)
        .bind(&workflow.name)
        .bind(&specification)
        .bind(workflow.status.as_str())
        .bind(workflow.version)
        .bind(&workflow.engine_workflow_id)
        .bind(&workflow.trigger_url)
        .bind(&workflow.created_by)
        .bind(timestamp(&workflow.created_at))
        .bind(timestamp(&workflow.updated_at))
        .execute(&mut *tx)
        .await?;

        insert_audit_query(event)?.execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowRecord>> {
        let sql = format!("SELECT {} FROM workflows w WHERE w.id = ?", WORKFLOW_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn load_workflow_with_organization(
        &self,
        id: &str,
    ) -> Result<Option<(WorkflowRecord, Organization)>> {
        let sql = format!(
            "SELECT {}, o.id AS org_id, o.name AS org_name, o.plan_status AS org_plan_status, \
             o.created_at AS org_created_at \
             FROM workflows w JOIN organizations o ON o.id = w.organization_id WHERE w.id = ?",
            WORKFLOW_COLUMNS
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => Ok(Some((workflow_from_row(&row)?, organization_from_row(&row, "org_")?))),
            None => Ok(None),
        }
    }

    async fn list_workflows(&self, organization_id: &str) -> Result<Vec<WorkflowRecord>> {
        let sql = format!(
            "SELECT {} FROM workflows w WHERE w.organization_id = ? ORDER BY w.updated_at DESC",
            WORKFLOW_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(organization_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(workflow_from_row).collect()
    }

    async fn replace_specification(
        &self,
        id: &str,
        expected_version: i64,
        specification: &WorkflowSpecification,
        status: WorkflowStatus,
        event: &AuditEvent,
    ) -> Result<bool> {
        let specification = serde_json::to_string(specification)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET specification = ?, status = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&specification)
        .bind(status.as_str())
        .bind(timestamp(&Utc::now()))
        .bind(id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_audit_query(event)?.execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn transition_status(
        &self,
        id: &str,
        from: WorkflowStatus,
        to: WorkflowStatus,
        event: &AuditEvent,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("UPDATE workflows SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(to.as_str())
                .bind(timestamp(&Utc::now()))
                .bind(id)
                .bind(from.as_str())
                .execute(&mut *tx)
                .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_audit_query(event)?.execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn commit_deployment(
        &self,
        commit: &DeploymentCommit,
        event: &AuditEvent,
    ) -> Result<Option<i64>> {
        let new_version = commit.expected_version + 1;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET status = ?, version = ?, engine_workflow_id = ?, trigger_url = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(WorkflowStatus::Deployed.as_str())
        .bind(new_version)
        .bind(&commit.engine_workflow_id)
        .bind(&commit.trigger_url)
        .bind(timestamp(&Utc::now()))
        .bind(&commit.workflow_id)
        .bind(commit.expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        insert_audit_query(event)?.execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(Some(new_version))
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM audit_events WHERE workflow_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OrganizationRepository for SqliteRepository {
    async fn upsert_organization(&self, organization: &Organization) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, plan_status, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                plan_status = excluded.plan_status
            "#,
        )
        .bind(&organization.id)
        .bind(&organization.name)
        .bind(organization.plan_status.as_str())
        .bind(timestamp(&organization.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        let row = sqlx::query("SELECT id, name, plan_status, created_at FROM organizations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|row| organization_from_row(row, "")).transpose()
    }

    async fn upsert_member(&self, member: &Member) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO members (id, organization_id, email, role)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                organization_id = excluded.organization_id,
                email = excluded.email,
                role = excluded.role
            "#,
        )
        .bind(&member.id)
        .bind(&member.organization_id)
        .bind(&member.email)
        .bind(member.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_member(&self, user_id: &str) -> Result<Option<Member>> {
        let row = sqlx::query("SELECT id, organization_id, email, role FROM members WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let role: String = row.try_get("role")?;
                Ok(Some(Member {
                    id: row.try_get("id")?,
                    organization_id: row.try_get("organization_id")?,
                    email: row.try_get("email")?,
                    role: Role::parse(&role),
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AuditRepository for SqliteRepository {
    async fn insert_audit_event(&self, event: &AuditEvent) -> Result<()> {
        insert_audit_query(event)?.execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_execution_event(&self, event: &AuditEvent) -> Result<String> {
        let (Some(workflow_id), Some(execution_id), Some(phase)) =
            (event.workflow_id.as_deref(), event.execution_id.as_deref(), event.phase())
        else {
            return Err(TesseraError::Validation(format!(
                "audit event {} is not an execution event of a workflow",
                event.id
            )));
        };

        let result = audit_query(INSERT_EXECUTION_SQL, event)?
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            return Ok(event.id.clone());
        }

        tracing::debug!(
            "🔁 Execution {} already has a {} event",
            execution_id,
            phase.as_str()
        );
        self.find_execution_event(workflow_id, execution_id, phase)
            .await?
            .map(|existing| existing.id)
            .ok_or_else(|| {
                TesseraError::Conflict(format!("audit event id {} already in use", event.id))
            })
    }

    async fn find_execution_event(
        &self,
        workflow_id: &str,
        execution_id: &str,
        phase: ExecutionPhase,
    ) -> Result<Option<AuditEvent>> {
        let sql = format!(
            "SELECT {} FROM audit_events WHERE workflow_id = ? AND execution_id = ? AND phase = ?",
            AUDIT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(workflow_id)
            .bind(execution_id)
            .bind(phase.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(audit_from_row).transpose()
    }

    async fn list_audit_events(&self, workflow_id: &str) -> Result<Vec<AuditEvent>> {
        let sql = format!(
            "SELECT {} FROM audit_events WHERE workflow_id = ? ORDER BY timestamp ASC, rowid ASC",
            AUDIT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(workflow_id).fetch_all(&self.pool).await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn count_audit_events(&self, organization_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM audit_events WHERE organization_id = ?")
            .bind(organization_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }
}

#[async_trait]
impl SecretRepository for SqliteRepository {
    async fn insert_secret(&self, secret: &SecretRecord) -> Result<()> {
        insert_secret_query(secret)
            .execute(&self.pool)
            .await
            .map_err(|err| secret_write_error(err, &secret.key_name))?;
        Ok(())
    }

    async fn get_secret(&self, organization_id: &str, key_name: &str) -> Result<Option<SecretRecord>> {
        let row = sqlx::query(
            "SELECT id, organization_id, key_name, encrypted_value, iv, auth_tag, created_at \
             FROM secrets WHERE organization_id = ? AND key_name = ?",
        )
        .bind(organization_id)
        .bind(key_name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let created_at: String = row.try_get("created_at")?;
                Ok(Some(SecretRecord {
                    id: row.try_get("id")?,
                    organization_id: row.try_get("organization_id")?,
                    key_name: row.try_get("key_name")?,
                    sealed: crate::vault::EncryptedSecret {
                        ciphertext: row.try_get("encrypted_value")?,
                        iv: row.try_get("iv")?,
                        tag: row.try_get("auth_tag")?,
                    },
                    created_at: parse_timestamp(&created_at)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn delete_secret(&self, organization_id: &str, key_name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM secrets WHERE organization_id = ? AND key_name = ?")
            .bind(organization_id)
            .bind(key_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_secret(&self, secret: &SecretRecord) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM secrets WHERE organization_id = ? AND key_name = ?")
            .bind(&secret.organization_id)
            .bind(&secret.key_name)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        // dropping `tx` on error rolls the delete back
        insert_secret_query(secret)
            .execute(&mut *tx)
            .await
            .map_err(|err| secret_write_error(err, &secret.key_name))?;

        tx.commit().await?;
        Ok(removed)
    }

    async fn list_secrets(&self, organization_id: &str) -> Result<Vec<SecretSummary>> {
        let rows = sqlx::query(
            "SELECT id, key_name, created_at FROM secrets WHERE organization_id = ? ORDER BY key_name",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<SecretSummary> {
                let created_at: String = row.try_get("created_at")?;
                Ok(SecretSummary {
                    id: row.try_get("id")?,
                    key_name: row.try_get("key_name")?,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}
