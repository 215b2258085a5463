use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Task record; `owner` is the id of the user it belongs to.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub owner: Uuid,
    pub description: String,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub description: Option<String>,
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Description,
    Completed,
}

impl SortField {
    pub fn column(self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Description => "description",
            SortField::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSort {
    pub field: SortField,
    pub descending: bool,
}

impl Default for TaskSort {
    fn default() -> Self {
        Self {
            field: SortField::CreatedAt,
            descending: true,
        }
    }
}

impl std::str::FromStr for TaskSort {
    type Err = String;

    /// Parses `<field>` or `<field>:<asc|desc>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, dir) = s.split_once(':').unwrap_or((s, "asc"));
        let field = match field {
            "created_at" | "createdAt" => SortField::CreatedAt,
            "updated_at" | "updatedAt" => SortField::UpdatedAt,
            "description" => SortField::Description,
            "completed" => SortField::Completed,
            other => return Err(format!("cannot sort by '{other}'")),
        };
        let descending = match dir {
            "asc" => false,
            "desc" => true,
            other => return Err(format!("unknown sort direction '{other}'")),
        };
        Ok(Self { field, descending })
    }
}

/// Listing parameters, already clamped by the handler.
#[derive(Debug, Clone, Copy)]
pub struct TaskFilter {
    pub completed: Option<bool>,
    pub limit: i64,
    pub skip: i64,
    pub sort: TaskSort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sort_expressions() {
        let sort: TaskSort = "created_at:desc".parse().unwrap();
        assert_eq!(sort, TaskSort::default());

        let sort: TaskSort = "description".parse().unwrap();
        assert_eq!(sort.field, SortField::Description);
        assert!(!sort.descending);

        let sort: TaskSort = "updatedAt:asc".parse().unwrap();
        assert_eq!(sort.field, SortField::UpdatedAt);
    }

    #[test]
    fn rejects_unknown_sort_fields() {
        assert!("owner:desc".parse::<TaskSort>().is_err());
        assert!("created_at:sideways".parse::<TaskSort>().is_err());
    }
}
