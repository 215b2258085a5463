use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    auth::guards::{Authorized, VerifiedSession},
    error::{AppError, AppResult},
    state::AppState,
    tasks::{
        dto::{normalize_description, CreateTaskRequest, ListTasksQuery, UpdateTaskRequest},
        model::Task,
    },
};

pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", get(get_task).patch(update_task).delete(delete_task))
}

type Owner = Authorized<VerifiedSession>;

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn create_task(
    State(state): State<AppState>,
    auth: Owner,
    Json(payload): Json<CreateTaskRequest>,
) -> AppResult<(StatusCode, [(header::HeaderName, String); 1], Json<Task>)> {
    let description = normalize_description(&payload.description)?;
    let task = state
        .tasks
        .create(auth.user.id, description, payload.completed)
        .await?;

    info!(task_id = %task.id, "task created");
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/tasks/{}", task.id))],
        Json(task),
    ))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn list_tasks(
    State(state): State<AppState>,
    auth: Owner,
    Query(q): Query<ListTasksQuery>,
) -> AppResult<Json<Vec<Task>>> {
    let filter = q.into_filter()?;
    let tasks = state.tasks.list(auth.user.id, filter).await?;
    Ok(Json(tasks))
}

#[instrument(skip_all, fields(user_id = %auth.user.id, task_id = %id))]
pub async fn get_task(
    State(state): State<AppState>,
    auth: Owner,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    state
        .tasks
        .get(auth.user.id, id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("task"))
}

#[instrument(skip_all, fields(user_id = %auth.user.id, task_id = %id))]
pub async fn update_task(
    State(state): State<AppState>,
    auth: Owner,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTaskRequest>,
) -> AppResult<Json<Task>> {
    let changes = payload.into_changes()?;
    state
        .tasks
        .update(auth.user.id, id, changes)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("task"))
}

#[instrument(skip_all, fields(user_id = %auth.user.id, task_id = %id))]
pub async fn delete_task(
    State(state): State<AppState>,
    auth: Owner,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    let task = state
        .tasks
        .delete(auth.user.id, id)
        .await?
        .ok_or(AppError::NotFound("task"))?;
    info!("task deleted");
    Ok(Json(task))
}
