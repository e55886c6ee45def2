// Authentication service - business logic layer

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{
    email::EmailSender,
    error::AuthError,
    models::{Account, AccountResponse, NewAccount},
    password::PasswordService,
    repository::{AccountRepository, TokenRepository},
    token::{generate_secret, hash_secret, TokenService},
};
use crate::telemetry;
use crate::validation::normalize_email;

/// Lifetime of an email verification token
pub const VERIFICATION_TOKEN_TTL_HOURS: i64 = 24;

/// Lifetime of a password reset token
pub const RESET_TOKEN_TTL_HOURS: i64 = 1;

/// Hashed once per service and compared against when no account matches
const DUMMY_PASSWORD: &str = "no-such-account-placeholder";

/// Tokens handed to a client after sign-in or refresh
#[derive(Debug, Clone)]
pub struct Session {
    pub account: AccountResponse,
    pub access_token: String,
    /// Only set on sign-in; refresh keeps the existing secret
    pub refresh_token: Option<String>,
}

/// Authentication service coordinating all auth operations
pub struct AuthService {
    accounts: Arc<dyn AccountRepository>,
    tokens: Arc<dyn TokenRepository>,
    password_service: PasswordService,
    token_service: TokenService,
    email_sender: Arc<dyn EmailSender>,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    dummy_hash: OnceCell<String>,
}

impl AuthService {
    /// Create a new AuthService with 1 hour access and 30 day refresh lifetimes
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        tokens: Arc<dyn TokenRepository>,
        password_service: PasswordService,
        token_service: TokenService,
        email_sender: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            accounts,
            tokens,
            password_service,
            token_service,
            email_sender,
            access_token_ttl: Duration::hours(1),
            refresh_token_ttl: Duration::days(30),
            dummy_hash: OnceCell::new(),
        }
    }

    /// Override the access and refresh token lifetimes
    pub fn with_token_ttls(mut self, access: Duration, refresh: Duration) -> Self {
        self.access_token_ttl = access;
        self.refresh_token_ttl = refresh;
        self
    }

    /// Register a new account
    ///
    /// A verification email is attempted afterwards; failing to send it does
    /// not undo the sign-up.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<AccountResponse, AuthError> {
        PasswordService::validate_password_strength(password)?;
        let email = normalize_email(email);

        if self.accounts.find_by_email(&email).await?.is_some() {
            debug!("Sign-up rejected, email already registered");
            return Err(AuthError::UserExists);
        }

        let password_hash = self.password_service.hash_password_blocking(password).await?;
        let account = self
            .accounts
            .create_account(NewAccount {
                email,
                username: username.trim().to_string(),
                password_hash,
            })
            .await?;

        info!("Account created: id={}", account.id);

        if let Err(e) = self.issue_verification(&account).await {
            warn!("Verification email after sign-up failed for {}: {}", account.id, e);
        }

        Ok(account.into())
    }

    /// Authenticate with email and password
    ///
    /// Unknown email, inactive account and wrong password all yield
    /// `InvalidCredentials`, and all three pay for one bcrypt comparison.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = normalize_email(email);

        let account = match self.accounts.find_by_email(&email).await? {
            Some(account) if account.is_active => account,
            _ => {
                self.compare_against_dummy(password).await?;
                telemetry::record_sign_in(false);
                return Err(AuthError::InvalidCredentials);
            }
        };

        let matches = self
            .password_service
            .verify_password_blocking(password, &account.password_hash)
            .await?;
        if !matches {
            telemetry::record_sign_in(false);
            return Err(AuthError::InvalidCredentials);
        }

        let access_token = self.issue_access_token(&account)?;
        let refresh = self.token_service.issue_refresh_secret();
        self.tokens
            .store_refresh(account.id, &refresh.hash, Utc::now() + self.refresh_token_ttl)
            .await?;

        if let Err(e) = self.accounts.record_login(account.id).await {
            warn!("Failed to record login for {}: {}", account.id, e);
        }

        telemetry::record_sign_in(true);
        info!("Account signed in: id={}", account.id);
        Ok(Session {
            account: account.into(),
            access_token,
            refresh_token: Some(refresh.bearer),
        })
    }

    /// Revoke one of the account's refresh secrets
    ///
    /// Unknown, already revoked or foreign secrets are not an error and are
    /// left untouched.
    pub async fn sign_out(&self, account_id: Uuid, refresh_secret: &str) -> Result<(), AuthError> {
        let revoked = self
            .tokens
            .revoke_refresh(account_id, &hash_secret(refresh_secret))
            .await?;
        if !revoked {
            debug!("Sign-out for {} matched no live refresh token", account_id);
        }
        Ok(())
    }

    /// Exchange a refresh secret for a new access token
    pub async fn refresh_session(&self, refresh_secret: &str) -> Result<Session, AuthError> {
        let account = self
            .tokens
            .validate_refresh(&hash_secret(refresh_secret))
            .await
            .map_err(|e| rejected("refresh", e))?;
        let access_token = self.issue_access_token(&account)?;

        debug!("Session refreshed for {}", account.id);
        Ok(Session {
            account: account.into(),
            access_token,
            refresh_token: None,
        })
    }

    /// Resolve an access token to the current, active account
    ///
    /// The account is always re-read so deactivation takes effect before the
    /// token expires.
    pub async fn validate_session(&self, access_token: &str) -> Result<Account, AuthError> {
        let claims = self
            .token_service
            .parse_access_token(access_token)
            .map_err(|_| rejected("access", AuthError::Unauthorized))?;

        match self.accounts.find_by_id(claims.sub).await? {
            Some(account) if account.is_active => Ok(account),
            Some(_) => {
                warn!("Token presented for deactivated account {}", claims.sub);
                Err(rejected("access", AuthError::Unauthorized))
            }
            None => Err(rejected("access", AuthError::Unauthorized)),
        }
    }

    /// Issue and send a fresh verification token for an unverified account
    pub async fn send_verification_email(&self, email: &str) -> Result<(), AuthError> {
        let account = self
            .accounts
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if account.is_verified {
            return Err(AuthError::EmailAlreadyVerified);
        }

        self.issue_verification(&account).await
    }

    /// Consume a verification token and mark its account verified
    pub async fn verify_email(&self, token: &str) -> Result<AccountResponse, AuthError> {
        let account = self
            .tokens
            .validate_verification(token)
            .await
            .map_err(|e| rejected("verification", e))?;
        if account.is_verified {
            return Err(AuthError::EmailAlreadyVerified);
        }

        self.tokens
            .mark_verified(account.id, token)
            .await
            .map_err(|e| rejected("verification", e))?;
        info!("Email verified for {}", account.id);

        let mut response = AccountResponse::from(account);
        response.is_verified = true;
        Ok(response)
    }

    /// Start a password reset
    ///
    /// Never fails towards the caller so responses cannot reveal whether the
    /// email is registered.
    pub async fn request_password_reset(&self, email: &str) {
        if let Err(e) = self.try_request_password_reset(&normalize_email(email)).await {
            match e {
                AuthError::UserNotFound => debug!("Password reset requested for unknown email"),
                other => warn!("Password reset request failed: {}", other),
            }
        }
    }

    async fn try_request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let account = self
            .accounts
            .find_by_email(email)
            .await?
            .filter(|a| a.is_active)
            .ok_or(AuthError::UserNotFound)?;

        let token = generate_secret();
        self.tokens
            .store_reset(account.id, &token, Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS))
            .await?;
        self.email_sender
            .send_password_reset_email(&account.email, &token)
            .await?;

        info!("Password reset issued for {}", account.id);
        Ok(())
    }

    /// Set a new password using a reset token
    ///
    /// The password update and token consumption commit together. If that
    /// step fails for any reason other than the token itself, the token is
    /// still revoked before the error is returned.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        PasswordService::validate_password_strength(new_password)?;

        let account = self
            .tokens
            .validate_reset(token)
            .await
            .map_err(|e| rejected("reset", e))?;
        let password_hash = self.password_service.hash_password_blocking(new_password).await?;

        match self
            .tokens
            .complete_password_reset(account.id, token, &password_hash)
            .await
        {
            Ok(()) => {
                info!("Password reset completed for {}", account.id);
                Ok(())
            }
            Err(AuthError::InvalidToken) => Err(rejected("reset", AuthError::InvalidToken)),
            Err(e) => {
                warn!("Password reset for {} failed, revoking token: {}", account.id, e);
                if let Err(revoke_err) = self.tokens.revoke_reset(token).await {
                    warn!("Revoking reset token failed: {}", revoke_err);
                }
                Err(e)
            }
        }
    }

    /// Soft-delete an account; existing tokens stop validating immediately
    pub async fn deactivate(&self, account_id: Uuid) -> Result<(), AuthError> {
        self.accounts.deactivate(account_id).await?;
        info!("Account deactivated: id={}", account_id);
        Ok(())
    }

    /// Delete expired token rows, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        let removed = self.tokens.purge_expired().await?;
        debug!("Purged {} expired tokens", removed);
        Ok(removed)
    }

    /// bcrypt comparison against a throwaway hash at the configured cost
    async fn compare_against_dummy(&self, password: &str) -> Result<(), AuthError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| self.password_service.hash_password_blocking(DUMMY_PASSWORD))
            .await?;
        self.password_service
            .verify_password_blocking(password, hash)
            .await?;
        Ok(())
    }

    fn issue_access_token(&self, account: &Account) -> Result<String, AuthError> {
        self.token_service.issue_access_token(
            account.id,
            &account.email,
            &account.username,
            self.access_token_ttl,
        )
    }

    async fn issue_verification(&self, account: &Account) -> Result<(), AuthError> {
        let token = generate_secret();
        self.tokens
            .store_verification(
                account.id,
                &token,
                Utc::now() + Duration::hours(VERIFICATION_TOKEN_TTL_HOURS),
            )
            .await?;
        self.email_sender
            .send_verification_email(&account.email, &token)
            .await
    }
}

/// Count token failures; store errors pass through uncounted
fn rejected(kind: &'static str, error: AuthError) -> AuthError {
    if matches!(error, AuthError::InvalidToken | AuthError::Unauthorized) {
        telemetry::record_token_rejected(kind);
    }
    error
}
