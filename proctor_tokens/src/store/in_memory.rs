//! An in-memory token store

use std::io;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{TokenRecord, TokenStore};

/// A token store that lives only as long as the process
#[derive(Default, Debug)]
pub struct InMemoryTokenStore {
    record: RwLock<TokenRecord>,
}

impl InMemoryTokenStore {
    /// Constructs a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs an in-memory store pre-populated with `record`
    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            record: RwLock::new(record),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self) -> io::Result<TokenRecord> {
        Ok(self.record.read().await.clone())
    }

    async fn save(&self, record: &TokenRecord) -> io::Result<()> {
        *self.record.write().await = record.clone();
        Ok(())
    }

    async fn clear(&self) -> io::Result<()> {
        *self.record.write().await = TokenRecord::default();
        Ok(())
    }
}
