//! Admin identity: sessions, the store-backed login provider and the
//! admin gate used by every `/admin` route.

mod authorizer;
mod principal;
mod provider;
mod session;

pub use authorizer::{parse_cookie, require_admin, require_user, session_token, DEFAULT_SESSION_COOKIE};
pub use principal::{normalize_email, Principal, Role};
pub use provider::{hash_password, verify_password, AuthError, AuthProvider, LoginRequest, LoginResponse, StoreAuthProvider, CREDENTIALS_COLLECTION, USERS_COLLECTION};
pub use session::{Session, SessionManager, SessionToken};
