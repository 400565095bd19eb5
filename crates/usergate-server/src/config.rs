use serde::{Deserialize, Serialize};

/// Longest access-token lifetime accepted from config (one year)
pub const MAX_ACCESS_TOKEN_TTL_MINUTES: i64 = 365 * 24 * 60;

fn default_max_connections() -> u32 {
    10
}

fn default_access_token_ttl_minutes() -> i64 {
    15
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// User seeded on startup when no user with this email exists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialUserConfig {
    pub email: String,
    pub password: String,
    pub username: Option<String>,
}

/// Auth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_access_token_ttl_minutes")]
    pub access_token_ttl_minutes: i64,
    pub initial_user: Option<InitialUserConfig>,
}

impl AuthConfig {
    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.access_token_ttl_minutes)
    }
}

/// Server configuration - loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String, // "0.0.0.0:8080"
    pub db: DbConfig,
    pub auth: AuthConfig,
}

impl ServerConfig {
    /// Reject values that would make the server unusable
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.is_empty() {
            anyhow::bail!("auth.jwt_secret must not be empty");
        }
        let ttl = self.auth.access_token_ttl_minutes;
        if !(1..=MAX_ACCESS_TOKEN_TTL_MINUTES).contains(&ttl) {
            anyhow::bail!(
                "auth.access_token_ttl_minutes must be between 1 and {}, got {}",
                MAX_ACCESS_TOKEN_TTL_MINUTES,
                ttl
            );
        }
        if self.db.max_connections == 0 {
            anyhow::bail!("db.max_connections must be at least 1");
        }
        Ok(())
    }
}

/// Load server config from a YAML file with USERGATE__ env var overrides.
pub fn load_config(path: &str) -> anyhow::Result<ServerConfig> {
    use anyhow::Context;
    let config: ServerConfig = config::Config::builder()
        .add_source(config::File::new(path, config::FileFormat::Yaml))
        .add_source(
            config::Environment::with_prefix("USERGATE")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to build config from: {}", path))?
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from: {}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config in: {}", path))?;
    Ok(config)
}
