use super::{Storage, User};
use crate::utils::{atomic_write, ensure_dir};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_CACHE_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(63);

/// One JSON document per user under `dir`, fronted by an LRU cache.
pub struct FileStorage {
    dir: PathBuf,
    cache: Mutex<LruCache<i64, User>>,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let dir = ensure_dir(dir)?;
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(DEFAULT_CACHE_SIZE);
        Ok(Self {
            dir,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn user_path(&self, id: i64) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn load(&self, id: i64) -> Result<Option<User>> {
        let path = self.user_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read user file: {}", path.display()))?;
        let user: User = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse user file: {}", path.display()))?;
        Ok(Some(user))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get_or_create_user(&self, id: i64) -> Result<User> {
        let cached = {
            let mut cache = self.cache.lock().await;
            cache.get(&id).cloned()
        };
        if let Some(user) = cached {
            return Ok(user);
        }

        let user = match self.load(id)? {
            Some(user) => user,
            None => {
                debug!("creating user {}", id);
                User::new(id)
            }
        };

        let mut cache = self.cache.lock().await;
        // Another task may have loaded it while we were reading
        if let Some(existing) = cache.get(&id) {
            return Ok(existing.clone());
        }
        cache.put(id, user.clone());
        Ok(user)
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        let path = self.user_path(user.id);
        let content = serde_json::to_string_pretty(user)?;
        atomic_write(&path, &content)
            .with_context(|| format!("Failed to write user file: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Holds API tokens
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
        }

        self.cache.lock().await.put(user.id, user.clone());
        Ok(())
    }
}
