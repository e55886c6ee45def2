// In-memory account and token store (development and tests)
// A single lock guards all maps so multi-record operations stay atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{Account, NewAccount, RefreshTokenRecord, SingleUsePurpose, SingleUseToken},
    repository::{AccountRepository, TokenRepository},
};

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    single_use: HashMap<(SingleUsePurpose, String), SingleUseToken>,
}

impl MemoryState {
    fn account_by_email(&self, email: &str) -> Option<&Account> {
        self.accounts.values().find(|a| a.email == email)
    }

    fn live_single_use(&self, purpose: SingleUsePurpose, token: &str, now: DateTime<Utc>) -> Option<&SingleUseToken> {
        self.single_use
            .get(&(purpose, token.to_string()))
            .filter(|t| t.is_valid_at(now))
    }

    fn validate_single_use(&self, purpose: SingleUsePurpose, token: &str) -> Result<Account, AuthError> {
        let record = self
            .live_single_use(purpose, token, Utc::now())
            .ok_or(AuthError::InvalidToken)?;
        self.accounts
            .get(&record.account_id)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }

    fn consume_single_use(&mut self, purpose: SingleUsePurpose, account_id: Uuid, token: &str) -> Result<(), AuthError> {
        let now = Utc::now();
        match self.single_use.get_mut(&(purpose, token.to_string())) {
            Some(record) if record.account_id == account_id && record.is_valid_at(now) => {
                record.used_at = Some(now);
                Ok(())
            }
            _ => Err(AuthError::InvalidToken),
        }
    }

    fn insert_single_use(&mut self, purpose: SingleUsePurpose, account_id: Uuid, token: &str, expires_at: DateTime<Utc>) {
        self.single_use.insert(
            (purpose, token.to_string()),
            SingleUseToken {
                id: Uuid::new_v4(),
                account_id,
                token: token.to_string(),
                expires_at,
                used_at: None,
                created_at: Utc::now(),
            },
        );
    }
}

/// Process-local store implementing both repository traits
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, AuthError> {
        let mut state = self.state.write().await;

        let taken = state.accounts.values().any(|a| {
            a.email == account.email || a.username.eq_ignore_ascii_case(&account.username)
        });
        if taken {
            return Err(AuthError::UserExists);
        }

        let now = Utc::now();
        let created = Account {
            id: Uuid::new_v4(),
            email: account.email,
            username: account.username,
            password_hash: account.password_hash,
            is_active: true,
            is_verified: false,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        state.accounts.insert(created.id, created.clone());

        debug!("Account stored in memory: id={}", created.id);
        Ok(created)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AuthError> {
        Ok(self.state.read().await.account_by_email(email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AuthError> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }

    async fn record_login(&self, id: Uuid) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if let Some(account) = state.accounts.get_mut(&id) {
            account.last_login_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        let account = state.accounts.get_mut(&id).ok_or(AuthError::UserNotFound)?;
        account.is_active = false;
        account.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn store_refresh(
        &self,
        account_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        state.refresh_tokens.insert(
            token_hash.to_string(),
            RefreshTokenRecord {
                id: Uuid::new_v4(),
                account_id,
                token_hash: token_hash.to_string(),
                expires_at,
                revoked_at: None,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn validate_refresh(&self, token_hash: &str) -> Result<Account, AuthError> {
        let state = self.state.read().await;
        let record = state
            .refresh_tokens
            .get(token_hash)
            .filter(|r| r.is_valid_at(Utc::now()))
            .ok_or(AuthError::InvalidToken)?;

        state
            .accounts
            .get(&record.account_id)
            .filter(|a| a.is_active)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }

    async fn revoke_refresh(&self, account_id: Uuid, token_hash: &str) -> Result<bool, AuthError> {
        let mut state = self.state.write().await;
        match state.refresh_tokens.get_mut(token_hash) {
            Some(record) if record.account_id == account_id && record.revoked_at.is_none() => {
                record.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn store_verification(
        &self,
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        state.insert_single_use(SingleUsePurpose::EmailVerification, account_id, token, expires_at);
        Ok(())
    }

    async fn validate_verification(&self, token: &str) -> Result<Account, AuthError> {
        self.state
            .read()
            .await
            .validate_single_use(SingleUsePurpose::EmailVerification, token)
    }

    async fn mark_verified(&self, account_id: Uuid, token: &str) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&account_id) {
            return Err(AuthError::UserNotFound);
        }

        state.consume_single_use(SingleUsePurpose::EmailVerification, account_id, token)?;
        if let Some(account) = state.accounts.get_mut(&account_id) {
            account.is_verified = true;
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn store_reset(
        &self,
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        state.insert_single_use(SingleUsePurpose::PasswordReset, account_id, token, expires_at);
        Ok(())
    }

    async fn validate_reset(&self, token: &str) -> Result<Account, AuthError> {
        self.state
            .read()
            .await
            .validate_single_use(SingleUsePurpose::PasswordReset, token)
    }

    async fn revoke_reset(&self, token: &str) -> Result<bool, AuthError> {
        let mut state = self.state.write().await;
        match state
            .single_use
            .get_mut(&(SingleUsePurpose::PasswordReset, token.to_string()))
        {
            Some(record) if record.used_at.is_none() => {
                record.used_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_password_reset(
        &self,
        account_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&account_id) {
            return Err(AuthError::UserNotFound);
        }

        state.consume_single_use(SingleUsePurpose::PasswordReset, account_id, token)?;
        if let Some(account) = state.accounts.get_mut(&account_id) {
            account.password_hash = password_hash.to_string();
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, AuthError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let before = state.refresh_tokens.len() + state.single_use.len();

        state.refresh_tokens.retain(|_, r| r.expires_at >= now);
        state.single_use.retain(|_, t| t.expires_at >= now);

        let after = state.refresh_tokens.len() + state.single_use.len();
        Ok((before - after) as u64)
    }
}
