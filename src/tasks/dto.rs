use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::tasks::model::{TaskChanges, TaskFilter, TaskSort};

pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTaskRequest {
    pub description: Option<String>,
    pub completed: Option<bool>,
}

impl UpdateTaskRequest {
    pub fn into_changes(self) -> AppResult<TaskChanges> {
        let description = self.description.as_deref().map(normalize_description).transpose()?;
        Ok(TaskChanges {
            description,
            completed: self.completed,
        })
    }
}

pub fn normalize_description(raw: &str) -> AppResult<String> {
    let d = raw.trim();
    if d.is_empty() {
        return Err(AppError::bad_request("description must not be empty"));
    }
    Ok(d.to_string())
}

/// `GET /tasks` query string.
#[derive(Debug, Default, Deserialize)]
pub struct ListTasksQuery {
    pub completed: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub skip: i64,
    pub sort_by: Option<String>,
}
fn default_limit() -> i64 {
    20
}

impl ListTasksQuery {
    /// Clamps paging to sane bounds and parses `sort_by`.
    pub fn into_filter(self) -> AppResult<TaskFilter> {
        let sort = match self.sort_by.as_deref() {
            None | Some("") => TaskSort::default(),
            Some(s) => s.parse().map_err(AppError::BadRequest)?,
        };
        Ok(TaskFilter {
            completed: self.completed,
            limit: self.limit.clamp(1, MAX_LIMIT),
            skip: self.skip.max(0),
            sort,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::model::SortField;

    #[test]
    fn query_defaults_and_clamping() {
        let q: ListTasksQuery = serde_json::from_str("{}").unwrap();
        let f = q.into_filter().unwrap();
        assert_eq!((f.limit, f.skip), (20, 0));
        assert_eq!(f.sort, TaskSort::default());

        let q = ListTasksQuery {
            limit: 1000,
            skip: -5,
            ..Default::default()
        };
        let f = q.into_filter().unwrap();
        assert_eq!((f.limit, f.skip), (MAX_LIMIT, 0));

        let q = ListTasksQuery {
            limit: 0,
            ..Default::default()
        };
        assert_eq!(q.into_filter().unwrap().limit, 1);
    }

    #[test]
    fn sort_by_is_parsed_or_rejected() {
        let q = ListTasksQuery {
            limit: 20,
            sort_by: Some("description:asc".into()),
            ..Default::default()
        };
        let f = q.into_filter().unwrap();
        assert_eq!(f.sort.field, SortField::Description);
        assert!(!f.sort.descending);

        let q = ListTasksQuery {
            sort_by: Some("password:desc".into()),
            ..Default::default()
        };
        assert!(matches!(q.into_filter(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn update_rejects_blank_description() {
        let req = UpdateTaskRequest {
            description: Some("   ".into()),
            completed: None,
        };
        assert!(req.into_changes().is_err());

        let changes = UpdateTaskRequest {
            description: Some(" buy milk ".into()),
            completed: Some(true),
        }
        .into_changes()
        .unwrap();
        assert_eq!(changes.description.as_deref(), Some("buy milk"));
        assert_eq!(changes.completed, Some(true));
    }
}
