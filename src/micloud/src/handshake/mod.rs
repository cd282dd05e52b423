//! Three-step account login.
//!
//! 1. `serviceLogin` returns a `_sign` for the account.
//! 2. `serviceLoginAuth2` exchanges the password hash for `ssecurity` and a
//!    redirect `location`, or asks for two-factor verification.
//! 3. Following `location` sets the `serviceToken` cookie.
//!
//! Every attempt runs on a freshly opened transport and either yields a
//! complete [`Session`], a [`TwoFactorChallenge`], or an error. Nothing from a
//! failed attempt is kept.

pub mod transport;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, Credentials};
use crate::crypto::password_hash;
use crate::params::OrderedParams;
use crate::session::{LoginState, LoginStateError, Session, TransportIdentity, TwoFactorChallenge};
use transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransportFactory, TransportError,
    TransportFactory,
};

/// Sentinel the account service prepends to its JSON replies.
pub const LOGIN_PREFIX: &str = "&&&START&&&";

const SERVICE_ID: &str = "xiaomiio";
const LOGIN_QS: &str = "%3Fsid%3Dxiaomiio%26_json%3Dtrue";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    Setup,
    ServiceLogin,
    ServiceLoginAuth,
    ServiceToken,
}

impl fmt::Display for LoginStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginStep::Setup => "setup",
            LoginStep::ServiceLogin => "step 1 (serviceLogin)",
            LoginStep::ServiceLoginAuth => "step 2 (serviceLoginAuth2)",
            LoginStep::ServiceToken => "step 3 (serviceToken)",
        };
        f.write_str(name)
    }
}

/// Why a login attempt failed. A two-factor challenge is not an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("{step}: {source}")]
    Transport {
        step: LoginStep,
        #[source]
        source: TransportError,
    },
    #[error("{step}: unexpected status {status}")]
    Status { step: LoginStep, status: u16 },
    #[error("{step}: missing field `{field}`")]
    MissingField { step: LoginStep, field: &'static str },
    #[error("{step}: malformed response: {reason}")]
    Decode { step: LoginStep, reason: String },
    #[error(transparent)]
    State(#[from] LoginStateError),
}

/// Successful end of a login attempt.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(Arc<Session>),
    TwoFactor(TwoFactorChallenge),
}

impl LoginOutcome {
    pub fn session(&self) -> Option<Arc<Session>> {
        match self {
            LoginOutcome::Authenticated(session) => Some(session.clone()),
            LoginOutcome::TwoFactor(_) => None,
        }
    }
}

/// Values returned by step 2 on success.
struct AuthGrant {
    ssecurity: String,
    user_id: String,
    c_user_id: String,
    pass_token: String,
    location: String,
    code: String,
}

enum AuthReply {
    Granted(AuthGrant),
    Challenge(TwoFactorChallenge),
}

/// Runs the login handshake for one account.
pub struct SessionAuthenticator {
    credentials: Credentials,
    config: Arc<ClientConfig>,
    factory: Arc<dyn TransportFactory>,
}

impl SessionAuthenticator {
    pub fn new(
        credentials: Credentials,
        config: Arc<ClientConfig>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            credentials,
            config,
            factory,
        }
    }

    /// Authenticator using the default config and the `reqwest` transport.
    pub fn with_defaults(credentials: Credentials) -> Self {
        Self::new(
            credentials,
            Arc::new(ClientConfig::default()),
            Arc::new(ReqwestTransportFactory),
        )
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs a full login with a brand-new transport identity.
    ///
    /// Safe to call repeatedly; each call is independent of the previous one.
    pub async fn authenticate(&self) -> Result<LoginOutcome, HandshakeError> {
        let result = self.run().await;
        match &result {
            Ok(LoginOutcome::Authenticated(session)) => {
                info!("logged in as user {}", session.user_id())
            }
            Ok(LoginOutcome::TwoFactor(challenge)) => warn!(
                "account {} requires two-factor verification: {}",
                self.credentials.username, challenge.notification_url
            ),
            Err(err) => warn!("login for {} failed: {}", self.credentials.username, err),
        }
        result
    }

    async fn run(&self) -> Result<LoginOutcome, HandshakeError> {
        let identity = TransportIdentity::generate();
        let transport = self
            .factory
            .open(&identity)
            .map_err(|source| HandshakeError::Transport {
                step: LoginStep::Setup,
                source,
            })?;

        let mut state = LoginState::Unauthenticated;

        let sign = self.service_login(&*transport, &identity).await?;
        state = state.transition(LoginState::Step1Done)?;
        debug!("{} complete", LoginStep::ServiceLogin);

        let grant = match self.service_login_auth(&*transport, &identity, &sign).await? {
            AuthReply::Granted(grant) => grant,
            AuthReply::Challenge(challenge) => {
                state.transition(LoginState::NeedsTwoFactor)?;
                return Ok(LoginOutcome::TwoFactor(challenge));
            }
        };
        state = state.transition(LoginState::Step2Done)?;
        debug!("{} complete", LoginStep::ServiceLoginAuth);

        let service_token = self
            .service_token(&*transport, &identity, &grant.location)
            .await?;
        state.transition(LoginState::Authenticated)?;

        Ok(LoginOutcome::Authenticated(Arc::new(Session {
            sign,
            ssecurity: grant.ssecurity,
            user_id: grant.user_id,
            c_user_id: grant.c_user_id,
            pass_token: grant.pass_token,
            location: grant.location,
            code: grant.code,
            service_token,
            identity,
            transport,
        })))
    }

    async fn service_login(
        &self,
        transport: &dyn HttpTransport,
        identity: &TransportIdentity,
    ) -> Result<String, HandshakeError> {
        let step = LoginStep::ServiceLogin;
        let request = login_headers(
            HttpRequest::get(self.config.service_login_url(), self.config.login_timeout()),
            identity,
        )
        .cookie("userId", self.credentials.username.as_str());

        let response = send(transport, request, step).await?;
        expect_ok(&response, step)?;
        let json = parse_login_json(&response.body, step)?;
        field_string(&json, "_sign").ok_or(HandshakeError::MissingField {
            step,
            field: "_sign",
        })
    }

    async fn service_login_auth(
        &self,
        transport: &dyn HttpTransport,
        identity: &TransportIdentity,
        sign: &str,
    ) -> Result<AuthReply, HandshakeError> {
        let step = LoginStep::ServiceLoginAuth;
        let form = OrderedParams::new()
            .with("sid", SERVICE_ID)
            .with("hash", password_hash(&self.credentials.password))
            .with("callback", self.config.sts_callback.as_str())
            .with("qs", LOGIN_QS)
            .with("user", self.credentials.username.as_str())
            .with("_sign", sign)
            .with("_json", "true");
        let request = login_headers(
            HttpRequest::post(
                self.config.service_login_auth_url(),
                form,
                self.config.login_timeout(),
            ),
            identity,
        );

        let response = send(transport, request, step).await?;
        expect_ok(&response, step)?;
        let json = parse_login_json(&response.body, step)?;

        match field_string(&json, "ssecurity") {
            Some(ssecurity) if ssecurity.len() > 4 => {
                let require = |field: &'static str| {
                    field_string(&json, field).ok_or(HandshakeError::MissingField { step, field })
                };
                Ok(AuthReply::Granted(AuthGrant {
                    user_id: require("userId")?,
                    c_user_id: require("cUserId")?,
                    pass_token: require("passToken")?,
                    location: require("location")?,
                    code: require("code")?,
                    ssecurity,
                }))
            }
            _ => match field_string(&json, "notificationUrl") {
                Some(notification_url) => {
                    Ok(AuthReply::Challenge(TwoFactorChallenge { notification_url }))
                }
                None => Err(HandshakeError::MissingField {
                    step,
                    field: "ssecurity",
                }),
            },
        }
    }

    async fn service_token(
        &self,
        transport: &dyn HttpTransport,
        identity: &TransportIdentity,
        location: &str,
    ) -> Result<String, HandshakeError> {
        let step = LoginStep::ServiceToken;
        let request = login_headers(
            HttpRequest::get(location, self.config.redirect_timeout()),
            identity,
        );
        let response = send(transport, request, step).await?;
        expect_ok(&response, step)?;
        response
            .cookie("serviceToken")
            .map(str::to_string)
            .ok_or(HandshakeError::MissingField {
                step,
                field: "serviceToken",
            })
    }
}

fn login_headers(request: HttpRequest, identity: &TransportIdentity) -> HttpRequest {
    request
        .header("User-Agent", identity.user_agent.as_str())
        .header("Content-Type", FORM_CONTENT_TYPE)
}

async fn send(
    transport: &dyn HttpTransport,
    request: HttpRequest,
    step: LoginStep,
) -> Result<HttpResponse, HandshakeError> {
    transport
        .execute(request)
        .await
        .map_err(|source| HandshakeError::Transport { step, source })
}

fn expect_ok(response: &HttpResponse, step: LoginStep) -> Result<(), HandshakeError> {
    if response.status == 200 {
        Ok(())
    } else {
        Err(HandshakeError::Status {
            step,
            status: response.status,
        })
    }
}

/// Strips [`LOGIN_PREFIX`] and parses the remaining JSON.
pub fn parse_login_json(body: &str, step: LoginStep) -> Result<Value, HandshakeError> {
    let trimmed = body.trim_start();
    let json = trimmed.strip_prefix(LOGIN_PREFIX).unwrap_or(trimmed);
    serde_json::from_str(json).map_err(|e| HandshakeError::Decode {
        step,
        reason: e.to_string(),
    })
}

/// Reads a scalar field as text; numeric ids are rendered in decimal.
fn field_string(json: &Value, key: &str) -> Option<String> {
    match json.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
