//! Central identity, session and authorization management.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod federated;
mod request_context;
mod authorizer;

pub use principal::{Principal, Role};
pub use session::{Claims, InvalidToken, SessionIssuer, SessionToken};
pub use provider::{AccountView, AuthProvider, LocalAuthProvider, LoginRequest, LoginResponse, RegisterRequest};
pub use federated::{ExternalIdentity, ExternalIdentityVerifier, FederatedLogin, GoogleIdTokenVerifier, GOOGLE_JWKS_URL};
pub use request_context::{RequestContext, authenticate, extract_token, parse_cookie, TOKEN_COOKIE, TOKEN_HEADER};
pub use authorizer::{Decision, Operation, Target, authorize, guard_update};
