// Repositories for accounts and tokens
// Traits define the storage contract; the Postgres implementations are the
// production backends and share nothing in process memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{Account, NewAccount, SingleUsePurpose},
};
use crate::db::with_timeout;

const ACCOUNT_COLUMNS: &str =
    "id, email, username, password_hash, is_active, is_verified, last_login_at, created_at, updated_at";

const JOINED_ACCOUNT_COLUMNS: &str = "a.id, a.email, a.username, a.password_hash, a.is_active, \
     a.is_verified, a.last_login_at, a.created_at, a.updated_at";

/// Account persistence
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a new account; `UserExists` if the email or username is taken
    async fn create_account(&self, account: NewAccount) -> Result<Account, AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AuthError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AuthError>;

    async fn record_login(&self, id: Uuid) -> Result<(), AuthError>;

    /// Soft delete: flips the active flag, the row is kept
    async fn deactivate(&self, id: Uuid) -> Result<(), AuthError>;
}

/// Refresh, email-verification and password-reset token persistence
///
/// Every `validate_*` call applies the same rule: the token exists, has not
/// expired and has not been used or revoked. Any violation is `InvalidToken`.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn store_refresh(
        &self,
        account_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError>;

    /// Resolve a refresh hash to its (active) account
    async fn validate_refresh(&self, token_hash: &str) -> Result<Account, AuthError>;

    /// Revoke a refresh hash owned by `account_id`
    ///
    /// Returns whether a live record was revoked by this call. Hashes that
    /// belong to another account are left alone.
    async fn revoke_refresh(&self, account_id: Uuid, token_hash: &str) -> Result<bool, AuthError>;

    async fn store_verification(
        &self,
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError>;

    async fn validate_verification(&self, token: &str) -> Result<Account, AuthError>;

    /// Set the verified flag and consume the token in one atomic step
    async fn mark_verified(&self, account_id: Uuid, token: &str) -> Result<(), AuthError>;

    async fn store_reset(
        &self,
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError>;

    async fn validate_reset(&self, token: &str) -> Result<Account, AuthError>;

    /// Returns whether a live token was revoked by this call
    async fn revoke_reset(&self, token: &str) -> Result<bool, AuthError>;

    /// Consume the reset token and store the new password hash atomically
    async fn complete_password_reset(
        &self,
        account_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> Result<(), AuthError>;

    /// Delete expired rows of every token kind
    async fn purge_expired(&self) -> Result<u64, AuthError>;
}

fn map_insert_error(err: sqlx::Error) -> AuthError {
    // Check for unique constraint violation
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AuthError::UserExists;
        }
    }
    AuthError::StoreError(err.to_string())
}

/// Account repository backed by PostgreSQL
#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn create_account(&self, account: NewAccount) -> Result<Account, AuthError> {
        let query = format!(
            "INSERT INTO accounts (id, email, username, password_hash) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            ACCOUNT_COLUMNS
        );

        with_timeout(self.timeout, async {
            sqlx::query_as::<_, Account>(&query)
                .bind(Uuid::new_v4())
                .bind(&account.email)
                .bind(&account.username)
                .bind(&account.password_hash)
                .fetch_one(&self.pool)
                .await
                .map_err(map_insert_error)
        })
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AuthError> {
        let query = format!("SELECT {} FROM accounts WHERE email = $1", ACCOUNT_COLUMNS);

        with_timeout(
            self.timeout,
            sqlx::query_as::<_, Account>(&query).bind(email).fetch_optional(&self.pool),
        )
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AuthError> {
        let query = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);

        with_timeout(
            self.timeout,
            sqlx::query_as::<_, Account>(&query).bind(id).fetch_optional(&self.pool),
        )
        .await
    }

    async fn record_login(&self, id: Uuid) -> Result<(), AuthError> {
        with_timeout(
            self.timeout,
            sqlx::query("UPDATE accounts SET last_login_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), AuthError> {
        let result = with_timeout(
            self.timeout,
            sqlx::query("UPDATE accounts SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }
}

/// Token repository backed by PostgreSQL
///
/// Single-use tokens are consumed with a conditional update
/// (`used_at IS NULL`) inside the same transaction as the account change, so
/// concurrent attempts with one token succeed at most once.
#[derive(Clone)]
pub struct PgTokenRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn store_single_use(
        &self,
        purpose: SingleUsePurpose,
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let query = format!(
            "INSERT INTO {} (id, account_id, token, expires_at) VALUES ($1, $2, $3, $4)",
            purpose.table()
        );

        with_timeout(
            self.timeout,
            sqlx::query(&query)
                .bind(Uuid::new_v4())
                .bind(account_id)
                .bind(token)
                .bind(expires_at)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn validate_single_use(&self, purpose: SingleUsePurpose, token: &str) -> Result<Account, AuthError> {
        let query = format!(
            "SELECT {} FROM accounts a JOIN {} t ON a.id = t.account_id \
             WHERE t.token = $1 AND t.expires_at > NOW() AND t.used_at IS NULL",
            JOINED_ACCOUNT_COLUMNS,
            purpose.table()
        );

        with_timeout(
            self.timeout,
            sqlx::query_as::<_, Account>(&query).bind(token).fetch_optional(&self.pool),
        )
        .await?
        .ok_or(AuthError::InvalidToken)
    }

    /// Mark a token used inside `tx`; `InvalidToken` unless exactly this call consumed it
    async fn consume_single_use(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        purpose: SingleUsePurpose,
        account_id: Uuid,
        token: &str,
    ) -> Result<(), AuthError> {
        let query = format!(
            "UPDATE {} SET used_at = NOW() \
             WHERE token = $1 AND account_id = $2 AND used_at IS NULL AND expires_at > NOW()",
            purpose.table()
        );

        let result = sqlx::query(&query)
            .bind(token)
            .bind(account_id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() != 1 {
            return Err(AuthError::InvalidToken);
        }
        Ok(())
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn store_refresh(
        &self,
        account_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        with_timeout(
            self.timeout,
            sqlx::query(
                "INSERT INTO refresh_tokens (id, account_id, token_hash, expires_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(account_id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn validate_refresh(&self, token_hash: &str) -> Result<Account, AuthError> {
        let query = format!(
            "SELECT {} FROM accounts a JOIN refresh_tokens rt ON a.id = rt.account_id \
             WHERE rt.token_hash = $1 \
               AND rt.expires_at > NOW() \
               AND rt.revoked_at IS NULL \
               AND a.is_active = TRUE",
            JOINED_ACCOUNT_COLUMNS
        );

        with_timeout(
            self.timeout,
            sqlx::query_as::<_, Account>(&query)
                .bind(token_hash)
                .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(AuthError::InvalidToken)
    }

    async fn revoke_refresh(&self, account_id: Uuid, token_hash: &str) -> Result<bool, AuthError> {
        let result = with_timeout(
            self.timeout,
            sqlx::query(
                "UPDATE refresh_tokens SET revoked_at = NOW() \
                 WHERE token_hash = $1 AND account_id = $2 AND revoked_at IS NULL",
            )
            .bind(token_hash)
            .bind(account_id)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn store_verification(
        &self,
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.store_single_use(SingleUsePurpose::EmailVerification, account_id, token, expires_at)
            .await
    }

    async fn validate_verification(&self, token: &str) -> Result<Account, AuthError> {
        self.validate_single_use(SingleUsePurpose::EmailVerification, token).await
    }

    async fn mark_verified(&self, account_id: Uuid, token: &str) -> Result<(), AuthError> {
        with_timeout(self.timeout, async {
            let mut tx = self.pool.begin().await?;

            Self::consume_single_use(&mut tx, SingleUsePurpose::EmailVerification, account_id, token).await?;

            sqlx::query("UPDATE accounts SET is_verified = TRUE, updated_at = NOW() WHERE id = $1")
                .bind(account_id)
                .execute(&mut *tx)
                .await?;

            // Dropping tx without commit rolls both statements back
            tx.commit().await?;
            Ok::<_, AuthError>(())
        })
        .await
    }

    async fn store_reset(
        &self,
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.store_single_use(SingleUsePurpose::PasswordReset, account_id, token, expires_at)
            .await
    }

    async fn validate_reset(&self, token: &str) -> Result<Account, AuthError> {
        self.validate_single_use(SingleUsePurpose::PasswordReset, token).await
    }

    async fn revoke_reset(&self, token: &str) -> Result<bool, AuthError> {
        let result = with_timeout(
            self.timeout,
            sqlx::query("UPDATE password_resets SET used_at = NOW() WHERE token = $1 AND used_at IS NULL")
                .bind(token)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_password_reset(
        &self,
        account_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> Result<(), AuthError> {
        with_timeout(self.timeout, async {
            let mut tx = self.pool.begin().await?;

            Self::consume_single_use(&mut tx, SingleUsePurpose::PasswordReset, account_id, token).await?;

            let updated = sqlx::query("UPDATE accounts SET password_hash = $1, updated_at = NOW() WHERE id = $2")
                .bind(password_hash)
                .bind(account_id)
                .execute(&mut *tx)
                .await?;
            if updated.rows_affected() == 0 {
                return Err(AuthError::UserNotFound);
            }

            tx.commit().await?;
            Ok::<_, AuthError>(())
        })
        .await
    }

    async fn purge_expired(&self) -> Result<u64, AuthError> {
        with_timeout(self.timeout, async {
            let mut removed = 0;
            for table in ["refresh_tokens", "email_verifications", "password_resets"] {
                let query = format!("DELETE FROM {} WHERE expires_at < NOW()", table);
                removed += sqlx::query(&query).execute(&self.pool).await?.rows_affected();
            }
            Ok::<_, AuthError>(removed)
        })
        .await
    }
}

// Live-database tests for these statements are in src/tests.rs (ignored by default)
