//! Authorization-code handshake support: anti-forgery state and PKCE.

mod pkce;
mod state;

pub use pkce::Pkce;
pub use state::{PendingAuthorization, StateManager};

/// Where to send the account owner to grant access.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Provider authorization URL, including the state parameter.
    pub url: String,
    /// Anti-forgery state the callback must echo back.
    pub state: String,
}

/// Query parameters received on the authorization callback.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: String,
    pub error: Option<String>,
    pub error_description: Option<String>,
}
