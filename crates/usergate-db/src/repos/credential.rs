use anyhow::{Context, Result};
use sqlx::PgConnection;

pub struct CredentialRepo;

impl CredentialRepo {
    pub async fn create(
        conn: &mut PgConnection,
        hashed_secret: &str,
        salt: Option<&str>,
    ) -> Result<i64> {
        let credential_id: i64 = sqlx::query_scalar(
            "INSERT INTO credential (hashed_secret, salt) VALUES ($1, $2) RETURNING credential_id",
        )
        .bind(hashed_secret)
        .bind(salt)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to create credential")?;
        Ok(credential_id)
    }

    pub async fn delete(conn: &mut PgConnection, credential_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM credential WHERE credential_id = $1")
            .bind(credential_id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete credential")?;
        Ok(())
    }
}
