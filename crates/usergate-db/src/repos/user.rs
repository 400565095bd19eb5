use anyhow::{Context, Result};
use sqlx::PgConnection;

/// A user joined with its credential
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: i64,
    pub username: Option<String>,
    pub email: String,
    pub roles: Vec<String>,
    pub is_active: bool,
    pub credential_id: i64,
    pub hashed_secret: String,
    pub salt: Option<String>,
}

const SELECT_USER: &str = r#"SELECT u.user_id, u.username, u.email, u.roles, u.is_active, u.credential_id, c.hashed_secret, c.salt FROM "user" u JOIN credential c ON c.credential_id = u.credential_id"#;

pub struct UserRepo;

impl UserRepo {
    pub async fn create(
        conn: &mut PgConnection,
        username: Option<&str>,
        email: &str,
        roles: &[String],
        is_active: bool,
        credential_id: i64,
    ) -> Result<i64> {
        let user_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO "user" (username, email, roles, is_active, credential_id) VALUES ($1, $2, $3, $4, $5) RETURNING user_id"#,
        )
        .bind(username)
        .bind(email)
        .bind(roles)
        .bind(is_active)
        .bind(credential_id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to create user")?;
        Ok(user_id)
    }

    pub async fn get_by_id(conn: &mut PgConnection, user_id: i64) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{} WHERE u.user_id = $1", SELECT_USER))
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to get user by id")?;
        Ok(row)
    }

    pub async fn get_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{} WHERE u.email = $1", SELECT_USER))
            .bind(email)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to get user by email")?;
        Ok(row)
    }

    pub async fn list(conn: &mut PgConnection) -> Result<Vec<UserRow>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!("{} ORDER BY u.user_id", SELECT_USER))
            .fetch_all(&mut *conn)
            .await
            .context("Failed to list users")?;
        Ok(rows)
    }

    /// Overwrite the updatable columns. Returns the number of rows touched.
    pub async fn update(
        conn: &mut PgConnection,
        user_id: i64,
        username: Option<&str>,
        email: &str,
        roles: &[String],
        is_active: bool,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"UPDATE "user" SET username = $2, email = $3, roles = $4, is_active = $5 WHERE user_id = $1"#,
        )
        .bind(user_id)
        .bind(username)
        .bind(email)
        .bind(roles)
        .bind(is_active)
        .execute(&mut *conn)
        .await
        .context("Failed to update user")?;
        Ok(result.rows_affected())
    }

    /// Delete a user, returning the id of the credential it owned.
    pub async fn delete(conn: &mut PgConnection, user_id: i64) -> Result<Option<i64>> {
        let credential_id: Option<i64> =
            sqlx::query_scalar(r#"DELETE FROM "user" WHERE user_id = $1 RETURNING credential_id"#)
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await
                .context("Failed to delete user")?;
        Ok(credential_id)
    }
}
