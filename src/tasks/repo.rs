use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::tasks::model::{Task, TaskChanges, TaskFilter};

/// Persistence seam for tasks. Every lookup is scoped by owner.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, owner: Uuid, description: String, completed: bool) -> StoreResult<Task>;
    async fn list(&self, owner: Uuid, filter: TaskFilter) -> StoreResult<Vec<Task>>;
    async fn get(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Task>>;
    async fn update(&self, owner: Uuid, id: Uuid, changes: TaskChanges) -> StoreResult<Option<Task>>;
    async fn delete(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Task>>;
    /// Removes every task of `owner`; returns how many were removed.
    async fn delete_by_owner(&self, owner: Uuid) -> StoreResult<u64>;
}

const TASK_COLUMNS: &str = "id, owner, description, completed, created_at, updated_at";

#[derive(Clone)]
pub struct PgTaskStore {
    db: PgPool,
}

impl PgTaskStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, owner: Uuid, description: String, completed: bool) -> StoreResult<Task> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (id, owner, description, completed)
            VALUES ($1, $2, $3, $4)
            RETURNING id, owner, description, completed, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(description)
        .bind(completed)
        .fetch_one(&self.db)
        .await?;
        Ok(task)
    }

    async fn list(&self, owner: Uuid, filter: TaskFilter) -> StoreResult<Vec<Task>> {
        // Sort column comes from a closed enum, never from user input.
        let dir = if filter.sort.descending { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE owner = $1 AND ($2::boolean IS NULL OR completed = $2) \
             ORDER BY {col} {dir}, id {dir} \
             LIMIT $3 OFFSET $4",
            col = filter.sort.field.column(),
        );
        let rows = sqlx::query_as::<_, Task>(&sql)
            .bind(owner)
            .bind(filter.completed)
            .bind(filter.limit)
            .bind(filter.skip)
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }

    async fn get(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, owner, description, completed, created_at, updated_at
              FROM tasks
             WHERE id = $1 AND owner = $2
            "#,
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await?;
        Ok(task)
    }

    async fn update(&self, owner: Uuid, id: Uuid, changes: TaskChanges) -> StoreResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
               SET description = COALESCE($3, description),
                   completed = COALESCE($4, completed),
                   updated_at = now()
             WHERE id = $1 AND owner = $2
            RETURNING id, owner, description, completed, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(changes.description)
        .bind(changes.completed)
        .fetch_optional(&self.db)
        .await?;
        Ok(task)
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            DELETE FROM tasks
             WHERE id = $1 AND owner = $2
            RETURNING id, owner, description, completed, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await?;
        Ok(task)
    }

    async fn delete_by_owner(&self, owner: Uuid) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM tasks WHERE owner = $1")
            .bind(owner)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected())
    }
}
