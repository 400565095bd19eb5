use crate::repos::credential::CredentialRepo;
use crate::repos::user::{UserRepo, UserRow};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use usergate_common::models::auth::{Role, UserView};

/// Failure surfaced by a persistence gateway
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
    #[error("malformed stored data: {0}")]
    Malformed(String),
    #[error(transparent)]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        let unique = err
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .filter(|db| db.is_unique_violation())
            .map(|db| db.constraint().unwrap_or("unknown").to_string());
        match unique {
            Some(constraint) => StoreError::UniqueViolation { constraint },
            None => StoreError::Backend(err),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from(anyhow::Error::new(err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub credential_id: i64,
    pub hashed_secret: String,
    pub salt: Option<String>,
}

/// A persisted user together with the credential it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: Option<String>,
    pub email: String,
    pub roles: Vec<Role>,
    pub is_active: bool,
    pub credential: StoredCredential,
}

impl UserRecord {
    pub fn view(&self) -> UserView {
        UserView {
            id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            roles: self.roles.clone(),
            is_active: self.is_active,
        }
    }
}

impl TryFrom<UserRow> for UserRecord {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let roles = row
            .roles
            .iter()
            .map(|r| r.parse::<Role>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Malformed(format!("user {}: {}", row.user_id, e)))?;
        Ok(UserRecord {
            user_id: row.user_id,
            username: row.username,
            email: row.email,
            roles,
            is_active: row.is_active,
            credential: StoredCredential {
                credential_id: row.credential_id,
                hashed_secret: row.hashed_secret,
                salt: row.salt,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub hashed_secret: String,
    pub salt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: Option<String>,
    pub email: String,
    pub roles: Vec<Role>,
    pub is_active: bool,
}

fn role_names(roles: &[Role]) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_string()).collect()
}

/// Entry point to the user store. Every unit of work runs inside a [`UserTx`].
#[async_trait]
pub trait UserGateway: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UserTx>>;
}

/// One transaction against the user store. Dropping it without calling
/// [`UserTx::commit`] discards every write made through it.
#[async_trait]
pub trait UserTx: Send {
    async fn fetch_by_id(&mut self, user_id: i64) -> StoreResult<Option<UserRecord>>;
    async fn fetch_by_email(&mut self, email: &str) -> StoreResult<Option<UserRecord>>;
    /// All users ordered by id
    async fn fetch_all(&mut self) -> StoreResult<Vec<UserRecord>>;
    async fn insert_credential(&mut self, credential: &NewCredential) -> StoreResult<i64>;
    async fn insert_user(&mut self, user: &NewUser, credential_id: i64) -> StoreResult<UserRecord>;
    /// Persist the updatable fields of `user`
    async fn update_user(&mut self, user: &UserRecord) -> StoreResult<()>;
    /// Delete a user and the credential it owns. Returns false if no such user.
    async fn delete_user(&mut self, user_id: i64) -> StoreResult<bool>;
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// PostgreSQL-backed gateway
#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserGateway for PgGateway {
    async fn begin(&self) -> StoreResult<Box<dyn UserTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUserTx { tx }))
    }
}

pub struct PgUserTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UserTx for PgUserTx {
    async fn fetch_by_id(&mut self, user_id: i64) -> StoreResult<Option<UserRecord>> {
        UserRepo::get_by_id(&mut self.tx, user_id)
            .await?
            .map(UserRecord::try_from)
            .transpose()
    }

    async fn fetch_by_email(&mut self, email: &str) -> StoreResult<Option<UserRecord>> {
        UserRepo::get_by_email(&mut self.tx, email)
            .await?
            .map(UserRecord::try_from)
            .transpose()
    }

    async fn fetch_all(&mut self) -> StoreResult<Vec<UserRecord>> {
        UserRepo::list(&mut self.tx)
            .await?
            .into_iter()
            .map(UserRecord::try_from)
            .collect()
    }

    async fn insert_credential(&mut self, credential: &NewCredential) -> StoreResult<i64> {
        let id = CredentialRepo::create(
            &mut self.tx,
            &credential.hashed_secret,
            credential.salt.as_deref(),
        )
        .await?;
        Ok(id)
    }

    async fn insert_user(&mut self, user: &NewUser, credential_id: i64) -> StoreResult<UserRecord> {
        let user_id = UserRepo::create(
            &mut self.tx,
            user.username.as_deref(),
            &user.email,
            &role_names(&user.roles),
            user.is_active,
            credential_id,
        )
        .await?;
        self.fetch_by_id(user_id).await?.ok_or_else(|| {
            StoreError::Malformed(format!("user {} vanished after insert", user_id))
        })
    }

    async fn update_user(&mut self, user: &UserRecord) -> StoreResult<()> {
        let touched = UserRepo::update(
            &mut self.tx,
            user.user_id,
            user.username.as_deref(),
            &user.email,
            &role_names(&user.roles),
            user.is_active,
        )
        .await?;
        if touched == 0 {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "user {} does not exist",
                user.user_id
            )));
        }
        Ok(())
    }

    async fn delete_user(&mut self, user_id: i64) -> StoreResult<bool> {
        let Some(credential_id) = UserRepo::delete(&mut self.tx, user_id).await? else {
            return Ok(false);
        };
        CredentialRepo::delete(&mut self.tx, credential_id).await?;
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(roles: &[&str]) -> UserRow {
        UserRow {
            user_id: 7,
            username: Some("bob".to_string()),
            email: "bob@example.com".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            is_active: true,
            credential_id: 3,
            hashed_secret: "abcd".to_string(),
            salt: Some("00ff".to_string()),
        }
    }

    #[test]
    fn test_row_converts_to_record() {
        let record = UserRecord::try_from(row(&["user", "teacher"])).unwrap();
        assert_eq!(record.roles, vec![Role::User, Role::Teacher]);
        assert_eq!(record.credential.credential_id, 3);
        let view = record.view();
        assert_eq!(view.id, 7);
        assert_eq!(view.email, "bob@example.com");
    }

    #[test]
    fn test_unknown_role_in_row_is_malformed() {
        let err = UserRecord::try_from(row(&["user", "root"])).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_plain_backend_error_is_not_unique_violation() {
        let err = StoreError::from(anyhow::anyhow!("connection reset"));
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
