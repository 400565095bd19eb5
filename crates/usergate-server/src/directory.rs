use crate::auth::{hash_password, verify_password, CredentialError, TokenError, TokenService};
use crate::policy::{self, Action, Decision, DenyReason, Subject};
use std::sync::Arc;
use usergate_common::models::auth::{DeleteConfirmation, Role, UserDraft, UserPatch, UserView};
use usergate_db::{NewCredential, NewUser, StoreError, UserGateway, UserRecord};

pub const MIN_PASSWORD_LEN: usize = 10;

// Used to spend one hash on logins for unknown emails
const DUMMY_SALT: &str = "00000000000000000000000000000000";

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Incorrect username or password")]
    InvalidCredentials,
    #[error("Could not validate credentials")]
    Unauthenticated,
    #[error("Inactive user")]
    Inactive,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),
    #[error("internal error: {0:#}")]
    Store(anyhow::Error),
}

impl From<StoreError> for DirectoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { constraint } if constraint.contains("email") => {
                DirectoryError::Conflict("User with such email already exist".to_string())
            }
            StoreError::UniqueViolation { constraint } => {
                DirectoryError::Conflict(format!("Conflicting record ({})", constraint))
            }
            StoreError::Malformed(msg) => DirectoryError::DataIntegrity(msg),
            StoreError::Backend(e) => DirectoryError::Store(e),
        }
    }
}

impl From<CredentialError> for DirectoryError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Malformed(msg) => DirectoryError::DataIntegrity(msg),
            CredentialError::Hashing(msg) => DirectoryError::Store(anyhow::anyhow!(msg)),
        }
    }
}

impl From<TokenError> for DirectoryError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired | TokenError::Invalid(_) => DirectoryError::Unauthenticated,
            TokenError::Signing(msg) => DirectoryError::Store(anyhow::anyhow!(msg)),
        }
    }
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// An authenticated caller, resolved from a token against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub UserView);

impl Actor {
    fn subject(&self) -> Subject<'_> {
        Subject {
            roles: &self.0.roles,
            is_active: self.0.is_active,
        }
    }
}

fn require(actor: &Actor, action: Action, target: Option<&UserRecord>) -> DirectoryResult<()> {
    match policy::authorize(actor.subject(), action, target.map(|t| t.roles.as_slice())) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => {
            tracing::debug!(actor = actor.0.id, ?action, ?reason, "Authorization denied");
            Err(match reason {
                DenyReason::Inactive => DirectoryError::Inactive,
                DenyReason::InsufficientRole => {
                    DirectoryError::Forbidden("Not enough permissions".to_string())
                }
                DenyReason::ProtectedTarget => {
                    let verb = match action {
                        Action::Delete => "delete",
                        _ => "update",
                    };
                    DirectoryError::Forbidden(format!("Can not {} super_admin", verb))
                }
            })
        }
    }
}

fn validate_email(email: &str) -> DirectoryResult<()> {
    let invalid = || DirectoryError::Validation(format!("Invalid email address: {}", email));
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    match domain.split_once('.') {
        Some((head, tail)) if !head.is_empty() && !tail.is_empty() && !domain.ends_with('.') => {
            Ok(())
        }
        _ => Err(invalid()),
    }
}

fn validate_roles(roles: &[Role]) -> DirectoryResult<()> {
    if roles.is_empty() {
        return Err(DirectoryError::Validation(
            "At least one role is required".to_string(),
        ));
    }
    Ok(())
}

fn validate_draft(draft: &UserDraft) -> DirectoryResult<()> {
    validate_email(&draft.email)?;
    validate_roles(&draft.roles)?;
    if draft.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DirectoryError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn validate_patch(patch: &UserPatch) -> DirectoryResult<()> {
    if let Some(email) = &patch.email {
        validate_email(email)?;
    }
    if let Some(roles) = &patch.roles {
        validate_roles(roles)?;
    }
    Ok(())
}

/// Merge the fields present in `patch` into `user`. Requested roles go
/// through the escalation guard.
pub fn apply_patch(user: &mut UserRecord, patch: UserPatch) {
    if let Some(username) = patch.username {
        user.username = username;
    }
    if let Some(email) = patch.email {
        user.email = email;
    }
    if let Some(roles) = patch.roles {
        user.roles = policy::normalize_requested_roles(&roles);
    }
    if let Some(is_active) = patch.is_active {
        user.is_active = is_active;
    }
}

/// User management use cases: login, token resolution and the CRUD
/// operations, each running inside a single gateway transaction.
pub struct UserDirectory {
    gateway: Arc<dyn UserGateway>,
    tokens: Arc<TokenService>,
}

impl UserDirectory {
    pub fn new(gateway: Arc<dyn UserGateway>, tokens: Arc<TokenService>) -> Self {
        Self { gateway, tokens }
    }

    /// Check an email/password pair and issue an access token.
    ///
    /// An unknown email and a wrong password fail the same way.
    pub async fn login(&self, email: &str, password: &str) -> DirectoryResult<String> {
        let mut tx = self.gateway.begin().await?;
        let user = tx.fetch_by_email(email).await?;
        drop(tx);

        let Some(user) = user else {
            let _ = hash_password(password, Some(DUMMY_SALT));
            return Err(DirectoryError::InvalidCredentials);
        };

        let verified = verify_password(
            password,
            &user.credential.hashed_secret,
            user.credential.salt.as_deref(),
        )
        .map_err(|e| {
            tracing::error!(user_id = user.user_id, "Stored credential unusable: {}", e);
            DirectoryError::from(e)
        })?;
        if !verified {
            return Err(DirectoryError::InvalidCredentials);
        }

        let token = self.tokens.issue(&user.email, user.user_id, None)?;
        tracing::info!(user_id = user.user_id, "Issued access token");
        Ok(token)
    }

    /// Resolve a bearer token to the user it names. Fails when the token is
    /// invalid, the user no longer exists, or the user's email is no longer
    /// the one the token was issued for.
    pub async fn authenticate(&self, token: &str) -> DirectoryResult<Actor> {
        let claims = self.tokens.validate(token).map_err(|e| {
            tracing::debug!("Rejected token: {}", e);
            DirectoryError::from(e)
        })?;
        let mut tx = self.gateway.begin().await?;
        // Ids are never reused, emails can be
        let user = tx
            .fetch_by_id(claims.uid)
            .await?
            .ok_or(DirectoryError::Unauthenticated)?;
        if user.email != claims.sub {
            tracing::debug!(user_id = user.user_id, "Token subject no longer matches user");
            return Err(DirectoryError::Unauthenticated);
        }
        Ok(Actor(user.view()))
    }

    pub fn get_self(&self, actor: &Actor) -> DirectoryResult<UserView> {
        require(actor, Action::ReadSelf, None)?;
        Ok(actor.0.clone())
    }

    /// All users ordered by id. An empty directory is reported as not found.
    pub async fn list_all(&self, actor: &Actor) -> DirectoryResult<Vec<UserView>> {
        require(actor, Action::ListAll, None)?;
        let mut tx = self.gateway.begin().await?;
        let users = tx.fetch_all().await?;
        if users.is_empty() {
            return Err(DirectoryError::NotFound("Users not found".to_string()));
        }
        Ok(users.iter().map(UserRecord::view).collect())
    }

    pub async fn get_by_id(&self, actor: &Actor, user_id: i64) -> DirectoryResult<UserView> {
        require(actor, Action::ReadById, None)?;
        let mut tx = self.gateway.begin().await?;
        let user = tx
            .fetch_by_id(user_id)
            .await?
            .ok_or_else(|| DirectoryError::NotFound("User not found".to_string()))?;
        Ok(user.view())
    }

    pub async fn create(&self, actor: &Actor, draft: UserDraft) -> DirectoryResult<UserView> {
        require(actor, Action::Create, None)?;
        validate_draft(&draft)?;

        let mut tx = self.gateway.begin().await?;
        if tx.fetch_by_email(&draft.email).await?.is_some() {
            return Err(DirectoryError::Conflict(
                "User with such email already exist".to_string(),
            ));
        }
        let roles = policy::normalize_requested_roles(&draft.roles);
        if roles != draft.roles {
            tracing::warn!(actor = actor.0.id, "Requested roles normalized to {:?}", roles);
        }

        let hashed = hash_password(&draft.password, None)?;
        let credential_id = tx
            .insert_credential(&NewCredential {
                hashed_secret: hashed.hashed_secret,
                salt: Some(hashed.salt),
            })
            .await?;
        let user = tx
            .insert_user(
                &NewUser {
                    username: draft.username,
                    email: draft.email,
                    roles,
                    is_active: true,
                },
                credential_id,
            )
            .await?;
        tx.commit().await?;

        tracing::info!(actor = actor.0.id, user_id = user.user_id, "Created user");
        Ok(user.view())
    }

    pub async fn update(
        &self,
        actor: &Actor,
        user_id: i64,
        patch: UserPatch,
    ) -> DirectoryResult<UserView> {
        require(actor, Action::Update, None)?;
        validate_patch(&patch)?;

        let mut tx = self.gateway.begin().await?;
        let mut user = tx
            .fetch_by_id(user_id)
            .await?
            .ok_or_else(|| DirectoryError::NotFound("User not found".to_string()))?;
        require(actor, Action::Update, Some(&user))?;

        if patch.is_empty() {
            return Ok(user.view());
        }
        apply_patch(&mut user, patch);
        tx.update_user(&user).await?;
        tx.commit().await?;

        tracing::info!(actor = actor.0.id, user_id, "Updated user");
        Ok(user.view())
    }

    pub async fn delete(&self, actor: &Actor, user_id: i64) -> DirectoryResult<DeleteConfirmation> {
        require(actor, Action::Delete, None)?;

        let mut tx = self.gateway.begin().await?;
        let user = tx
            .fetch_by_id(user_id)
            .await?
            .ok_or_else(|| DirectoryError::NotFound("User not found".to_string()))?;
        require(actor, Action::Delete, Some(&user))?;

        if !tx.delete_user(user_id).await? {
            return Err(DirectoryError::NotFound("User not found".to_string()));
        }
        tx.commit().await?;

        tracing::info!(actor = actor.0.id, user_id, "Deleted user");
        Ok(DeleteConfirmation { deleted: true })
    }

    /// Create a user unless one with the same email exists, bypassing the
    /// authorization policy and the escalation guard. Used for startup seeding.
    pub async fn seed_user(
        &self,
        email: &str,
        password: &str,
        username: Option<&str>,
        roles: Vec<Role>,
    ) -> DirectoryResult<Option<UserView>> {
        validate_email(email)?;
        validate_roles(&roles)?;

        let mut tx = self.gateway.begin().await?;
        if tx.fetch_by_email(email).await?.is_some() {
            return Ok(None);
        }
        let hashed = hash_password(password, None)?;
        let credential_id = tx
            .insert_credential(&NewCredential {
                hashed_secret: hashed.hashed_secret,
                salt: Some(hashed.salt),
            })
            .await?;
        let user = tx
            .insert_user(
                &NewUser {
                    username: username.map(str::to_string),
                    email: email.to_string(),
                    roles,
                    is_active: true,
                },
                credential_id,
            )
            .await?;
        tx.commit().await?;
        Ok(Some(user.view()))
    }
}
