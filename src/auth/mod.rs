// Authentication module
// Local credentials, JWT access tokens, opaque refresh secrets, email
// verification and password reset

pub mod email;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;
pub mod token;

// Re-export commonly used types
pub use email::{EmailSender, LogEmailSender};
pub use error::AuthError;
pub use memory::MemoryStore;
pub use middleware::{require_session, AuthenticatedUser};
pub use models::{Account, AccountResponse};
pub use password::PasswordService;
pub use repository::{AccountRepository, PgAccountRepository, PgTokenRepository, TokenRepository};
pub use service::{AuthService, Session};
pub use token::{Claims, TokenService};
