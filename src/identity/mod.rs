//! Identity: users, credentials, tokens and the authenticator that ties them together.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod user;
mod password;
mod token;
mod store;
mod authenticator;
mod authorizer;
mod request_context;

pub use principal::Principal;
pub use user::{normalize_email, NewUser, Profile, ProfileUpdate, Role, User, UserRecord};
pub use password::PasswordHasher;
pub use token::{bearer_token, Claims, TokenError, TokenIssuer, TokenKind, TokenPair};
pub use store::{CredentialStore, JsonFileCredentialStore, MemoryCredentialStore, StoreError, StoreResult};
pub use authenticator::{
    is_valid_email, AuthResponse, ChangePasswordRequest, LoginRequest, RefreshResponse, RegisterRequest,
    SessionAuthenticator, MIN_PASSWORD_LEN,
};
pub use authorizer::{ensure_author, ensure_super_admin, has_permission, has_role};
pub use request_context::RequestContext;
