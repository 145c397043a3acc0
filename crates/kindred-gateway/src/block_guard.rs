use std::sync::Arc;

use uuid::Uuid;

use kindred_types::ChatError;

use crate::store::{BlockStore, blocking};

/// Read-only gate over the block relation. A pair is blocked if either user
/// blocked the other. Checked at the moment of an action only; existing
/// messages and sessions are never touched by it.
#[derive(Clone)]
pub struct BlockGuard {
    store: Arc<dyn BlockStore>,
}

impl BlockGuard {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }

    pub async fn is_blocked(&self, a: Uuid, b: Uuid) -> Result<bool, ChatError> {
        let store = self.store.clone();
        blocking(move || store.is_blocked(a, b)).await
    }

    /// `Forbidden` if the pair is blocked in either direction.
    pub async fn ensure_not_blocked(&self, a: Uuid, b: Uuid) -> Result<(), ChatError> {
        if self.is_blocked(a, b).await? {
            return Err(ChatError::Forbidden("users have blocked each other".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_db::Database;
    use kindred_types::ErrorKind;

    #[tokio::test]
    async fn either_direction_blocks() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        db.create_user(&a.to_string(), "alice").unwrap();
        db.create_user(&b.to_string(), "bob").unwrap();
        let guard = BlockGuard::new(db.clone());

        assert!(!guard.is_blocked(a, b).await.unwrap());
        guard.ensure_not_blocked(a, b).await.unwrap();

        db.insert_block(&b.to_string(), &a.to_string()).unwrap();
        assert!(guard.is_blocked(a, b).await.unwrap());
        assert!(guard.is_blocked(b, a).await.unwrap());
        let err = guard.ensure_not_blocked(a, b).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
}
