use super::{Storage, User};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local backend. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    users: RwLock<HashMap<i64, User>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_or_create_user(&self, id: i64) -> Result<User> {
        if let Some(user) = self.users.read().await.get(&id) {
            return Ok(user.clone());
        }
        let mut users = self.users.write().await;
        Ok(users.entry(id).or_insert_with(|| User::new(id)).clone())
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        self.users.write().await.insert(user.id, user.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests;
