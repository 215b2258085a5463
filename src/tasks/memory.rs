use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::tasks::model::{SortField, Task, TaskChanges, TaskFilter};
use crate::tasks::repo::TaskStore;

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Task>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn compare(a: &Task, b: &Task, field: SortField) -> Ordering {
    let primary = match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Description => a.description.cmp(&b.description),
        SortField::Completed => a.completed.cmp(&b.completed),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, owner: Uuid, description: String, completed: bool) -> StoreResult<Task> {
        let now = OffsetDateTime::now_utc();
        let task = Task {
            id: Uuid::new_v4(),
            owner,
            description,
            completed,
            created_at: now,
            updated_at: now,
        };
        self.write().insert(task.id, task.clone());
        Ok(task)
    }

    async fn list(&self, owner: Uuid, filter: TaskFilter) -> StoreResult<Vec<Task>> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<Task> = tasks
            .values()
            .filter(|t| t.owner == owner)
            .filter(|t| filter.completed.map_or(true, |c| t.completed == c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let ord = compare(a, b, filter.sort.field);
            if filter.sort.descending {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(rows
            .into_iter()
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn get(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Task>> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tasks.get(&id).filter(|t| t.owner == owner).cloned())
    }

    async fn update(&self, owner: Uuid, id: Uuid, changes: TaskChanges) -> StoreResult<Option<Task>> {
        let mut tasks = self.write();
        let Some(task) = tasks.get_mut(&id).filter(|t| t.owner == owner) else {
            return Ok(None);
        };
        if let Some(description) = changes.description {
            task.description = description;
        }
        if let Some(completed) = changes.completed {
            task.completed = completed;
        }
        task.updated_at = OffsetDateTime::now_utc();
        Ok(Some(task.clone()))
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Task>> {
        let mut tasks = self.write();
        if tasks.get(&id).is_some_and(|t| t.owner == owner) {
            Ok(tasks.remove(&id))
        } else {
            Ok(None)
        }
    }

    async fn delete_by_owner(&self, owner: Uuid) -> StoreResult<u64> {
        let mut tasks = self.write();
        let before = tasks.len();
        tasks.retain(|_, t| t.owner != owner);
        Ok((before - tasks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::model::TaskSort;

    fn filter(completed: Option<bool>, limit: i64, skip: i64, sort: &str) -> TaskFilter {
        TaskFilter {
            completed,
            limit,
            skip,
            sort: sort.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn list_filters_sorts_and_paginates() {
        let store = MemoryTaskStore::new();
        let owner = Uuid::new_v4();
        for (d, c) in [("b", false), ("a", true), ("d", false), ("c", true)] {
            store.create(owner, d.into(), c).await.unwrap();
        }
        store.create(Uuid::new_v4(), "other".into(), false).await.unwrap();

        let all = store
            .list(owner, filter(None, 10, 0, "description:asc"))
            .await
            .unwrap();
        let names: Vec<_> = all.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);

        let done = store
            .list(owner, filter(Some(true), 10, 0, "description:desc"))
            .await
            .unwrap();
        let names: Vec<_> = done.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(names, ["c", "a"]);

        let page = store
            .list(owner, filter(None, 2, 1, "description:asc"))
            .await
            .unwrap();
        let names: Vec<_> = page.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[tokio::test]
    async fn tasks_are_scoped_by_owner() {
        let store = MemoryTaskStore::new();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let task = store.create(owner, "write report".into(), false).await.unwrap();

        assert!(store.get(intruder, task.id).await.unwrap().is_none());
        assert!(store
            .update(intruder, task.id, TaskChanges { completed: Some(true), ..Default::default() })
            .await
            .unwrap()
            .is_none());
        assert!(store.delete(intruder, task.id).await.unwrap().is_none());
        assert!(store.get(owner, task.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_by_owner_is_repeatable() {
        let store = MemoryTaskStore::new();
        let owner = Uuid::new_v4();
        store.create(owner, "one".into(), false).await.unwrap();
        store.create(owner, "two".into(), false).await.unwrap();

        assert_eq!(store.delete_by_owner(owner).await.unwrap(), 2);
        assert_eq!(store.delete_by_owner(owner).await.unwrap(), 0);
        let left = store
            .list(owner, TaskFilter { completed: None, limit: 10, skip: 0, sort: TaskSort::default() })
            .await
            .unwrap();
        assert!(left.is_empty());
    }
}
