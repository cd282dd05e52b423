use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{ClientConfig, Credentials};
use crate::envelope::{EnvelopeCrypto, EnvelopeError, DATA_FIELD};
use crate::handshake::transport::{
    HttpRequest, ReqwestTransportFactory, TransportError, TransportFactory,
};
use crate::handshake::{HandshakeError, LoginOutcome, SessionAuthenticator};
use crate::messages::{
    ActionParams, ActionRequest, ActionResult, ApiResponse, Device, DeviceList,
    DeviceListRequest, PropertyMapping, PropertyQuery, PropertyRequest, PropertyResult,
    PropertyWrite,
};
use crate::params::OrderedParams;
use crate::session::{AuthState, Session};

pub const DEVICE_LIST_PATH: &str = "/home/device_list";
pub const PROP_GET_PATH: &str = "/miotspec/prop/get";
pub const PROP_SET_PATH: &str = "/miotspec/prop/set";
pub const ACTION_PATH: &str = "/miotspec/action";

/// Errors emitted by the RPC client.
///
/// The client never retries; callers decide whether a failure warrants a new
/// login (see [`ClientError::is_session_suspect`]).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("two-factor verification required: {0}")]
    TwoFactorRequired(String),
    #[error("login failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("request encode failed: {0}")]
    Encode(String),
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("unexpected response shape: missing {0}")]
    UnexpectedShape(&'static str),
}

impl ClientError {
    /// True for failures an expired session typically produces.
    pub fn is_session_suspect(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::Status(_)
                | ClientError::Envelope(_)
                | ClientError::Decode(_)
        )
    }
}

/// Authenticated Mi Cloud client exposing the device property/action surface.
///
/// # Guarantees
/// * The auth state is swapped as a whole; requests take an `Arc<Session>`
///   snapshot and never observe a login in progress.
/// * Logins are serialized and each one opens a new transport identity.
/// * A failed RPC never touches the auth state.
pub struct MiCloudClient {
    authenticator: SessionAuthenticator,
    config: Arc<ClientConfig>,
    state: RwLock<AuthState>,
    login_lock: Mutex<()>,
}

impl MiCloudClient {
    pub fn new(
        credentials: Credentials,
        config: Arc<ClientConfig>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            authenticator: SessionAuthenticator::new(credentials, config.clone(), factory),
            config,
            state: RwLock::new(AuthState::Unauthenticated),
            login_lock: Mutex::new(()),
        }
    }

    /// Client over `reqwest` with the default config. Does not log in.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self::new(
            credentials,
            Arc::new(ClientConfig::default()),
            Arc::new(ReqwestTransportFactory),
        )
    }

    /// Builds a client and logs in.
    ///
    /// # Errors
    /// `ClientError::TwoFactorRequired` when the account needs out-of-band
    /// verification, `ClientError::Handshake` for any other login failure.
    pub async fn connect(
        credentials: Credentials,
        config: Arc<ClientConfig>,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, ClientError> {
        let client = Self::new(credentials, config, factory);
        match client.login().await? {
            LoginOutcome::Authenticated(_) => Ok(client),
            LoginOutcome::TwoFactor(challenge) => {
                Err(ClientError::TwoFactorRequired(challenge.notification_url))
            }
        }
    }

    /// Runs a full login and publishes the result.
    ///
    /// A failure leaves the client `Unauthenticated`; nothing from the
    /// previous session survives a new attempt.
    pub async fn login(&self) -> Result<LoginOutcome, HandshakeError> {
        let _guard = self.login_lock.lock().await;
        let result = self.authenticator.authenticate().await;
        let next = match &result {
            Ok(LoginOutcome::Authenticated(session)) => AuthState::Authenticated(session.clone()),
            Ok(LoginOutcome::TwoFactor(challenge)) => AuthState::NeedsTwoFactor(challenge.clone()),
            Err(_) => AuthState::Unauthenticated,
        };
        *self.state.write() = next;
        result
    }

    pub fn state(&self) -> AuthState {
        self.state.read().clone()
    }

    pub fn credentials(&self) -> &Credentials {
        self.authenticator.credentials()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Result<Arc<Session>, ClientError> {
        match &*self.state.read() {
            AuthState::Authenticated(session) => Ok(session.clone()),
            AuthState::NeedsTwoFactor(challenge) => Err(ClientError::TwoFactorRequired(
                challenge.notification_url.clone(),
            )),
            AuthState::Unauthenticated => Err(ClientError::NotAuthenticated),
        }
    }

    pub fn api_url(&self, path: &str) -> String {
        self.config.api_url(&self.credentials().region, path)
    }

    /// Posts an RC4-encrypted call and returns the decrypted JSON reply.
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        path: &str,
        data: &T,
    ) -> Result<Value, ClientError> {
        let session = self.session()?;
        let url = self.api_url(path);
        let params = OrderedParams::new().with(DATA_FIELD, encode_data(data)?);
        let crypto = EnvelopeCrypto::new(session.ssecurity());
        let sealed = crypto.seal(&url, "POST", params, now_millis())?;

        let request = self
            .rpc_request(&session, &url, sealed.params.clone())
            .header("MIOT-ENCRYPT-ALGORITHM", "ENCRYPT-RC4");
        let body = self.post(&session, path, request).await?;
        Ok(crypto.open_reply(&sealed.params, &body)?)
    }

    /// Posts a plaintext call signed with the HMAC plain signature.
    pub async fn request_signed<T: Serialize + ?Sized>(
        &self,
        path: &str,
        data: &T,
    ) -> Result<Value, ClientError> {
        let session = self.session()?;
        let url = self.api_url(path);
        let params = OrderedParams::new().with(DATA_FIELD, encode_data(data)?);
        let signed = EnvelopeCrypto::new(session.ssecurity()).sign_plain(&url, params, now_millis())?;

        let request = self.rpc_request(&session, &url, signed.params);
        let body = self.post(&session, path, request).await?;
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub async fn get_devices(&self) -> Result<Vec<Device>, ClientError> {
        let reply = self.request(DEVICE_LIST_PATH, &DeviceListRequest::default()).await?;
        let list: DeviceList = decode_result(reply)?;
        Ok(list.list)
    }

    /// Looks up a device's `did` by its local token.
    pub async fn get_device_id(&self, token: &str) -> Result<Option<String>, ClientError> {
        let devices = self.get_devices().await?;
        Ok(devices
            .into_iter()
            .find(|device| device.token == token)
            .map(|device| device.did))
    }

    pub async fn get_property(&self, did: &str, siid: u32, piid: u32) -> Result<Value, ClientError> {
        let data = PropertyRequest::new(vec![PropertyQuery {
            did: did.to_string(),
            siid,
            piid,
        }]);
        let reply = self.request(PROP_GET_PATH, &data).await?;
        let results: Vec<PropertyResult> = decode_result(reply)?;
        results
            .into_iter()
            .next()
            .and_then(|result| result.value)
            .ok_or(ClientError::UnexpectedShape("result[0].value"))
    }

    /// Fetches every property in `mapping` in one round trip.
    ///
    /// An empty mapping returns an empty list without contacting the API.
    pub async fn get_properties(
        &self,
        did: &str,
        mapping: &PropertyMapping,
    ) -> Result<Vec<PropertyResult>, ClientError> {
        if mapping.is_empty() {
            return Ok(Vec::new());
        }
        let data = PropertyRequest::new(
            mapping
                .iter()
                .map(|(_, property)| PropertyQuery {
                    did: did.to_string(),
                    siid: property.siid,
                    piid: property.piid,
                })
                .collect(),
        );
        let reply = self.request(PROP_GET_PATH, &data).await?;
        decode_result(reply)
    }

    /// Returns `true` when the device acknowledged the write.
    pub async fn set_property(
        &self,
        did: &str,
        siid: u32,
        piid: u32,
        value: Value,
    ) -> Result<bool, ClientError> {
        let data = PropertyRequest::new(vec![PropertyWrite {
            did: did.to_string(),
            siid,
            piid,
            value,
        }]);
        let reply = self.request(PROP_SET_PATH, &data).await?;
        let results: Vec<PropertyResult> = decode_result(reply)?;
        Ok(!results.is_empty() && results.iter().all(PropertyResult::is_ok))
    }

    pub async fn call_action(
        &self,
        did: &str,
        siid: u32,
        aiid: u32,
        input: Vec<Value>,
        out: Vec<Value>,
    ) -> Result<ActionResult, ClientError> {
        let data = ActionRequest {
            params: ActionParams {
                did: did.to_string(),
                siid,
                aiid,
                input,
                out,
            },
        };
        let reply = self.request(ACTION_PATH, &data).await?;
        decode_result(reply)
    }

    fn rpc_request(&self, session: &Session, url: &str, form: OrderedParams) -> HttpRequest {
        let identity = session.identity();
        HttpRequest::post(url, form, self.config.rpc_timeout())
            .header("Accept-Encoding", "identity")
            .header("User-Agent", identity.user_agent.as_str())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("x-xiaomi-protocal-flag-cli", "PROTOCAL-HTTP2")
            .cookie("userId", session.user_id())
            .cookie("yetAnotherServiceToken", session.service_token())
            .cookie("serviceToken", session.service_token())
            .cookie("locale", self.config.locale.as_str())
            .cookie("timezone", self.config.timezone.as_str())
            .cookie("is_daylight", self.config.is_daylight.as_str())
            .cookie("dst_offset", self.config.dst_offset.as_str())
            .cookie("channel", self.config.channel.as_str())
    }

    async fn post(
        &self,
        session: &Session,
        path: &str,
        request: HttpRequest,
    ) -> Result<String, ClientError> {
        let response = session.transport().execute(request).await.map_err(|err| {
            warn!("POST {} failed: {}", path, err);
            ClientError::Transport(err)
        })?;
        debug!("POST {} -> {}", path, response.status);
        if response.status != 200 {
            warn!("POST {} returned status {}", path, response.status);
            return Err(ClientError::Status(response.status));
        }
        Ok(response.body)
    }
}

fn encode_data<T: Serialize + ?Sized>(data: &T) -> Result<String, ClientError> {
    serde_json::to_string(data).map_err(|e| ClientError::Encode(e.to_string()))
}

/// Checks the reply `code` and decodes its `result`.
fn decode_result<T: DeserializeOwned>(reply: Value) -> Result<T, ClientError> {
    let response: ApiResponse =
        serde_json::from_value(reply).map_err(|e| ClientError::Decode(e.to_string()))?;
    if response.code != 0 {
        return Err(ClientError::Api {
            code: response.code,
            message: response.message.unwrap_or_default(),
        });
    }
    let result = response.result.ok_or(ClientError::UnexpectedShape("result"))?;
    serde_json::from_value(result).map_err(|e| ClientError::Decode(e.to_string()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
