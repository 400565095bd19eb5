use crate::auth::TokenService;
use crate::config::ServerConfig;
use crate::directory::UserDirectory;
use std::sync::Arc;
use usergate_db::UserGateway;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub directory: Arc<UserDirectory>,
}

impl AppState {
    /// Create a new app state. The token service is built once from the auth
    /// config and never changes afterwards.
    pub fn new(config: ServerConfig, gateway: Arc<dyn UserGateway>) -> Self {
        let tokens = TokenService::new(&config.auth.jwt_secret, config.auth.access_token_ttl());
        Self {
            config: Arc::new(config),
            directory: Arc::new(UserDirectory::new(gateway, Arc::new(tokens))),
        }
    }

    /// Seed the configured initial user with `super_admin` unless a user with
    /// that email already exists.
    pub async fn seed_initial_user(&self) -> anyhow::Result<()> {
        use anyhow::Context;
        let Some(initial) = &self.config.auth.initial_user else {
            return Ok(());
        };
        let created = self
            .directory
            .seed_user(
                &initial.email,
                &initial.password,
                initial.username.as_deref(),
                vec![usergate_common::models::auth::Role::SuperAdmin],
            )
            .await
            .context("Failed to seed initial user")?;
        match created {
            Some(user) => tracing::info!("Created initial user: {} (id {})", user.email, user.id),
            None => tracing::info!(
                "Initial user '{}' already exists, skipping seed",
                initial.email
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, DbConfig, InitialUserConfig};
    use usergate_common::models::auth::Role;
    use usergate_db::MemoryGateway;

    fn test_config(initial_user: Option<InitialUserConfig>) -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            db: DbConfig {
                url: "postgres://invalid:5432/db".to_string(),
                max_connections: 1,
            },
            auth: AuthConfig {
                jwt_secret: "test-secret".to_string(),
                access_token_ttl_minutes: 15,
                initial_user,
            },
        }
    }

    #[tokio::test]
    async fn test_seed_initial_user_once() {
        let gateway = MemoryGateway::new();
        let state = AppState::new(
            test_config(Some(InitialUserConfig {
                email: "root@example.com".to_string(),
                password: "root-password".to_string(),
                username: None,
            })),
            Arc::new(gateway.clone()),
        );

        state.seed_initial_user().await.unwrap();
        state.seed_initial_user().await.unwrap();
        assert_eq!(gateway.user_count(), 1);

        let token = state
            .directory
            .login("root@example.com", "root-password")
            .await
            .unwrap();
        let actor = state.directory.authenticate(&token).await.unwrap();
        assert_eq!(actor.0.roles, vec![Role::SuperAdmin]);
    }

    #[tokio::test]
    async fn test_seed_without_initial_user_is_noop() {
        let gateway = MemoryGateway::new();
        let state = AppState::new(test_config(None), Arc::new(gateway.clone()));
        state.seed_initial_user().await.unwrap();
        assert_eq!(gateway.user_count(), 0);
    }
}
