use std::sync::Arc;

use crate::auth::jwt::JwtKeys;
use crate::auth::tokens::TokenStore;
use crate::config::AppConfig;
use crate::db;
use crate::mailer::{LogMailer, Mailer};
use crate::storage::{Storage, StorageClient};
use crate::tasks::memory::MemoryTaskStore;
use crate::tasks::repo::{PgTaskStore, TaskStore};
use crate::users::memory::MemoryUserStore;
use crate::users::repo::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub tokens: TokenStore,
    pub jwt: Arc<JwtKeys>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let (users, tasks): (Arc<dyn UserStore>, Arc<dyn TaskStore>) = match &config.database_url {
            Some(url) => {
                let pool = db::connect(url).await?;
                (
                    Arc::new(PgUserStore::new(pool.clone())),
                    Arc::new(PgTaskStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set; keeping users and tasks in memory");
                (
                    Arc::new(MemoryUserStore::new()),
                    Arc::new(MemoryTaskStore::new()),
                )
            }
        };

        let storage = Arc::new(Storage::new(&config.s3).await?) as Arc<dyn StorageClient>;

        Self::from_parts(config, users, tasks, storage, Arc::new(LogMailer))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        tasks: Arc<dyn TaskStore>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        let jwt = Arc::new(JwtKeys::from_config(&config.jwt)?);
        Ok(Self {
            tokens: TokenStore::new(Arc::clone(&users)),
            config,
            users,
            tasks,
            jwt,
            storage,
            mailer,
        })
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::config::S3Config;
    use crate::mailer::RecordingMailer;

    /// In-process object store.
    #[derive(Default)]
    pub struct FakeStorage {
        pub objects: Mutex<HashMap<String, (Bytes, String)>>,
    }

    #[async_trait]
    impl StorageClient for FakeStorage {
        async fn put_object(&self, k: &str, b: Bytes, ct: &str) -> anyhow::Result<()> {
            self.objects.lock().unwrap().insert(k.to_string(), (b, ct.to_string()));
            Ok(())
        }
        async fn delete_object(&self, k: &str) -> anyhow::Result<()> {
            self.objects.lock().unwrap().remove(k);
            Ok(())
        }
        async fn presign_get(&self, k: &str, _s: u64) -> anyhow::Result<String> {
            Ok(format!("https://fake.local/{}", k))
        }
    }

    pub struct Fakes {
        pub state: AppState,
        pub mailer: Arc<RecordingMailer>,
        pub storage: Arc<FakeStorage>,
    }

    impl AppState {
        pub fn fake() -> Fakes {
            let config = Arc::new(AppConfig {
                database_url: None,
                jwt: crate::auth::jwt::test_config("test-secret"),
                s3: S3Config {
                    endpoint: "fake".into(),
                    bucket: "fake".into(),
                    access_key: "fake".into(),
                    secret_key: "fake".into(),
                    region: "us-east-1".into(),
                },
                verification_ttl_minutes: 60,
            });
            let mailer = Arc::new(RecordingMailer::default());
            let storage = Arc::new(FakeStorage::default());
            let state = AppState::from_parts(
                config,
                Arc::new(MemoryUserStore::new()),
                Arc::new(MemoryTaskStore::new()),
                storage.clone(),
                mailer.clone(),
            )
            .expect("fake state");
            Fakes {
                state,
                mailer,
                storage,
            }
        }
    }
}
