//! Mi Cloud session and RPC client.
//!
//! Logs an account in through the three-step account handshake, then talks to
//! the device API with RC4-drop1024 encrypted, SHA-1 signed form envelopes
//! keyed by a per-request signed nonce.

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod handshake;
pub mod messages;
pub mod params;
pub mod sdk;
pub mod session;

pub use config::{ClientConfig, Credentials};
pub use envelope::{EnvelopeCrypto, SealedEnvelope};
pub use handshake::transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransportFactory, TransportError,
    TransportFactory,
};
pub use handshake::{HandshakeError, LoginOutcome, SessionAuthenticator};
pub use messages::{ActionResult, Device, PropertyMapping, PropertyRef, PropertyResult};
pub use params::OrderedParams;
pub use sdk::{ClientError, MiCloudClient};
pub use session::{AuthState, Session, TransportIdentity, TwoFactorChallenge};
