use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::handshake::transport::HttpTransport;

pub mod state;
pub use state::{LoginState, LoginStateError};

/// Per-login transport identity: replaced as a whole on every login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportIdentity {
    pub device_id: String,
    pub user_agent: String,
}

impl TransportIdentity {
    /// Random 6-letter device id and an Android app user agent with a random
    /// 13-letter agent id drawn from `A..=E`.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let device_id: String = (0..6).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
        let agent_id: String = (0..13).map(|_| rng.gen_range(b'A'..=b'E') as char).collect();
        Self {
            device_id,
            user_agent: format!(
                "Android-7.1.1-1.0.0-ONEPLUS A3010-136-{agent_id} APP/xiaomi.smarthome APPV/62830"
            ),
        }
    }
}

/// Fully authenticated session. Only the handshake can build one, and only
/// once every field has been received.
#[derive(Clone)]
pub struct Session {
    pub(crate) sign: String,
    pub(crate) ssecurity: String,
    pub(crate) user_id: String,
    pub(crate) c_user_id: String,
    pub(crate) pass_token: String,
    pub(crate) location: String,
    pub(crate) code: String,
    pub(crate) service_token: String,
    pub(crate) identity: TransportIdentity,
    pub(crate) transport: Arc<dyn HttpTransport>,
}

impl Session {
    pub fn sign(&self) -> &str {
        &self.sign
    }

    /// Base64 session secret. Root key material for every request.
    pub fn ssecurity(&self) -> &str {
        &self.ssecurity
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn c_user_id(&self) -> &str {
        &self.c_user_id
    }

    pub fn pass_token(&self) -> &str {
        &self.pass_token
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn service_token(&self) -> &str {
        &self.service_token
    }

    pub fn identity(&self) -> &TransportIdentity {
        &self.identity
    }

    /// Transport (and cookie jar) the login ran on.
    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        self.transport.clone()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("c_user_id", &self.c_user_id)
            .field("location", &self.location)
            .field("identity", &self.identity)
            .field("ssecurity", &"<redacted>")
            .field("service_token", &"<redacted>")
            .field("pass_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Out-of-band verification the account service demanded instead of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorChallenge {
    pub notification_url: String,
}

/// What the client currently knows about the account.
#[derive(Debug, Clone, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    NeedsTwoFactor(TwoFactorChallenge),
    Authenticated(Arc<Session>),
}

impl AuthState {
    pub fn session(&self) -> Option<Arc<Session>> {
        match self {
            AuthState::Authenticated(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    pub fn challenge(&self) -> Option<&TwoFactorChallenge> {
        match self {
            AuthState::NeedsTwoFactor(challenge) => Some(challenge),
            _ => None,
        }
    }
}
