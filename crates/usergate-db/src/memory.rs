use crate::gateway::{
    NewCredential, NewUser, StoreError, StoreResult, StoredCredential, UserGateway, UserRecord,
    UserTx,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    version: u64,
    next_user_id: i64,
    next_credential_id: i64,
    users: BTreeMap<i64, UserRecord>,
    // Credentials inserted but not yet linked to a user
    unlinked: HashMap<i64, StoredCredential>,
}

/// In-process gateway used by unit tests.
///
/// A transaction works on a private copy of the store and publishes it on
/// commit. Commits are optimistic: if another transaction committed writes in
/// the meantime, the later commit fails instead of overwriting them.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed users
    pub fn user_count(&self) -> usize {
        self.lock().map(|s| s.users.len()).unwrap_or_default()
    }

    /// Number of committed credentials, linked or not
    pub fn credential_count(&self) -> usize {
        self.lock()
            .map(|s| s.users.len() + s.unlinked.len())
            .unwrap_or_default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))
    }
}

#[async_trait]
impl UserGateway for MemoryGateway {
    async fn begin(&self) -> StoreResult<Box<dyn UserTx>> {
        let snapshot = self.lock()?.clone();
        Ok(Box::new(MemoryTx {
            shared: self.state.clone(),
            base_version: snapshot.version,
            working: snapshot,
            inserted: BTreeSet::new(),
            updated: BTreeSet::new(),
            dirty: false,
        }))
    }
}

struct MemoryTx {
    shared: Arc<Mutex<MemoryState>>,
    base_version: u64,
    working: MemoryState,
    // Users written by this transaction, checked again at commit
    inserted: BTreeSet<i64>,
    updated: BTreeSet<i64>,
    dirty: bool,
}

impl MemoryTx {
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.working
            .users
            .values()
            .any(|u| u.email == email && Some(u.user_id) != except)
    }
}

#[async_trait]
impl UserTx for MemoryTx {
    async fn fetch_by_id(&mut self, user_id: i64) -> StoreResult<Option<UserRecord>> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn fetch_by_email(&mut self, email: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn fetch_all(&mut self) -> StoreResult<Vec<UserRecord>> {
        Ok(self.working.users.values().cloned().collect())
    }

    async fn insert_credential(&mut self, credential: &NewCredential) -> StoreResult<i64> {
        self.working.next_credential_id += 1;
        let credential_id = self.working.next_credential_id;
        self.working.unlinked.insert(
            credential_id,
            StoredCredential {
                credential_id,
                hashed_secret: credential.hashed_secret.clone(),
                salt: credential.salt.clone(),
            },
        );
        self.dirty = true;
        Ok(credential_id)
    }

    async fn insert_user(&mut self, user: &NewUser, credential_id: i64) -> StoreResult<UserRecord> {
        if self.email_taken(&user.email, None) {
            return Err(StoreError::UniqueViolation {
                constraint: "uq_user_email".to_string(),
            });
        }
        if self
            .working
            .users
            .values()
            .any(|u| u.credential.credential_id == credential_id)
        {
            return Err(StoreError::UniqueViolation {
                constraint: "uq_user_credential_id".to_string(),
            });
        }
        let credential = self.working.unlinked.remove(&credential_id).ok_or_else(|| {
            StoreError::Backend(anyhow::anyhow!("credential {} does not exist", credential_id))
        })?;

        self.working.next_user_id += 1;
        let record = UserRecord {
            user_id: self.working.next_user_id,
            username: user.username.clone(),
            email: user.email.clone(),
            roles: user.roles.clone(),
            is_active: user.is_active,
            credential,
        };
        self.working.users.insert(record.user_id, record.clone());
        self.inserted.insert(record.user_id);
        self.dirty = true;
        Ok(record)
    }

    async fn update_user(&mut self, user: &UserRecord) -> StoreResult<()> {
        if self.email_taken(&user.email, Some(user.user_id)) {
            return Err(StoreError::UniqueViolation {
                constraint: "uq_user_email".to_string(),
            });
        }
        let existing = self.working.users.get_mut(&user.user_id).ok_or_else(|| {
            StoreError::Backend(anyhow::anyhow!("user {} does not exist", user.user_id))
        })?;
        existing.username = user.username.clone();
        existing.email = user.email.clone();
        existing.roles = user.roles.clone();
        existing.is_active = user.is_active;
        self.updated.insert(user.user_id);
        self.dirty = true;
        Ok(())
    }

    async fn delete_user(&mut self, user_id: i64) -> StoreResult<bool> {
        let removed = self.working.users.remove(&user_id).is_some();
        self.dirty |= removed;
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            shared,
            base_version,
            mut working,
            inserted,
            updated,
            dirty,
        } = *self;
        if !dirty {
            return Ok(());
        }
        let mut current = shared
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))?;
        if current.version != base_version {
            // A losing writer whose emails now collide reports the same
            // violation the schema would
            let collides = |user_id: i64, fresh: bool| {
                working.users.get(&user_id).is_some_and(|mine| {
                    current
                        .users
                        .values()
                        .any(|u| u.email == mine.email && (fresh || u.user_id != user_id))
                })
            };
            if inserted.iter().any(|id| collides(*id, true))
                || updated.iter().any(|id| collides(*id, false))
            {
                return Err(StoreError::UniqueViolation {
                    constraint: "uq_user_email".to_string(),
                });
            }
            return Err(StoreError::Backend(anyhow::anyhow!(
                "concurrent update detected, transaction aborted"
            )));
        }
        working.version = base_version + 1;
        *current = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usergate_common::models::auth::Role;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            username: None,
            email: email.to_string(),
            roles: vec![Role::User],
            is_active: true,
        }
    }

    fn new_credential() -> NewCredential {
        NewCredential {
            hashed_secret: "ab".repeat(32),
            salt: Some("cd".repeat(16)),
        }
    }

    async fn insert(gateway: &MemoryGateway, email: &str) -> StoreResult<UserRecord> {
        let mut tx = gateway.begin().await?;
        let credential_id = tx.insert_credential(&new_credential()).await?;
        let user = tx.insert_user(&new_user(email), credential_id).await?;
        tx.commit().await?;
        Ok(user)
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let gateway = MemoryGateway::new();
        {
            let mut tx = gateway.begin().await.unwrap();
            let credential_id = tx.insert_credential(&new_credential()).await.unwrap();
            tx.insert_user(&new_user("a@example.com"), credential_id)
                .await
                .unwrap();
        }
        assert_eq!(gateway.user_count(), 0);
        assert_eq!(gateway.credential_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let gateway = MemoryGateway::new();
        insert(&gateway, "a@example.com").await.unwrap();
        let err = insert(&gateway, "a@example.com").await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
        assert_eq!(gateway.user_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_credential() {
        let gateway = MemoryGateway::new();
        let user = insert(&gateway, "a@example.com").await.unwrap();

        let mut tx = gateway.begin().await.unwrap();
        assert!(tx.delete_user(user.user_id).await.unwrap());
        assert!(!tx.delete_user(user.user_id).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(gateway.user_count(), 0);
        assert_eq!(gateway.credential_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_commit_is_rejected() {
        let gateway = MemoryGateway::new();
        let mut first = gateway.begin().await.unwrap();
        let mut second = gateway.begin().await.unwrap();

        let c1 = first.insert_credential(&new_credential()).await.unwrap();
        first
            .insert_user(&new_user("same@example.com"), c1)
            .await
            .unwrap();
        let c2 = second.insert_credential(&new_credential()).await.unwrap();
        second
            .insert_user(&new_user("same@example.com"), c2)
            .await
            .unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        match err {
            StoreError::UniqueViolation { constraint } => assert_eq!(constraint, "uq_user_email"),
            other => panic!("expected unique violation, got {:?}", other),
        }
        assert_eq!(gateway.user_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_email_change_is_unique_violation() {
        let gateway = MemoryGateway::new();
        let a = insert(&gateway, "a@example.com").await.unwrap();
        let b = insert(&gateway, "b@example.com").await.unwrap();

        let mut first = gateway.begin().await.unwrap();
        let mut second = gateway.begin().await.unwrap();

        let mut renamed_a = a.clone();
        renamed_a.email = "c@example.com".to_string();
        first.update_user(&renamed_a).await.unwrap();
        let mut renamed_b = b.clone();
        renamed_b.email = "c@example.com".to_string();
        second.update_user(&renamed_b).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(StoreError::UniqueViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_unrelated_concurrent_commit_is_backend_error() {
        let gateway = MemoryGateway::new();
        let mut first = gateway.begin().await.unwrap();
        let mut second = gateway.begin().await.unwrap();

        let c1 = first.insert_credential(&new_credential()).await.unwrap();
        first.insert_user(&new_user("x@example.com"), c1).await.unwrap();
        let c2 = second.insert_credential(&new_credential()).await.unwrap();
        second.insert_user(&new_user("y@example.com"), c2).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(StoreError::Backend(_))));
        assert_eq!(gateway.user_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_is_ordered_by_id() {
        let gateway = MemoryGateway::new();
        insert(&gateway, "b@example.com").await.unwrap();
        insert(&gateway, "a@example.com").await.unwrap();

        let mut tx = gateway.begin().await.unwrap();
        let users = tx.fetch_all().await.unwrap();
        let ids: Vec<i64> = users.iter().map(|u| u.user_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
