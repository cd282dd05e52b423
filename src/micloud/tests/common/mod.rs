#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use micloud::crypto;
use micloud::handshake::transport::{
    HttpRequest, HttpResponse, HttpTransport, TransportError, TransportFactory,
};
use micloud::session::TransportIdentity;
use micloud::{ClientConfig, Credentials, MiCloudClient};
use serde_json::{json, Value};

pub const SSECURITY: &str = "AAECAwQFBgcICQoLDA0ODw==";
pub const SERVICE_TOKEN: &str = "service-token-T";
pub const LOCATION: &str = "https://sts.api.io.mi.com/sts?d=abc";

type Responder = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

/// In-memory transport answering with a closure and recording every request.
pub struct ScriptedTransport {
    responder: Arc<Responder>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.responder)(&request)
    }
}

/// Factory handing out scripted transports and remembering each identity.
pub struct ScriptedFactory {
    responder: Arc<Responder>,
    opened: Mutex<Vec<(TransportIdentity, Arc<ScriptedTransport>)>>,
    opens: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Arc::new(responder),
            opened: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn identities(&self) -> Vec<TransportIdentity> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    /// Every request across every transport, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, transport)| transport.requests())
            .collect()
    }

    pub fn requests_to(&self, fragment: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(fragment))
            .collect()
    }
}

impl TransportFactory for ScriptedFactory {
    fn open(&self, identity: &TransportIdentity) -> Result<Arc<dyn HttpTransport>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(ScriptedTransport {
            responder: self.responder.clone(),
            requests: Mutex::new(Vec::new()),
        });
        self.opened
            .lock()
            .unwrap()
            .push((identity.clone(), transport.clone()));
        Ok(transport)
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("u", "p", "de")
}

pub fn step1_ok() -> HttpResponse {
    HttpResponse::new(200, r#"&&&START&&&{"_sign":"S1","qs":"%3Fsid"}"#)
}

pub fn step2_ok() -> HttpResponse {
    let body = json!({
        "ssecurity": SSECURITY,
        "userId": 1,
        "cUserId": "c-user",
        "passToken": "pass-token",
        "location": LOCATION,
        "code": 0,
    });
    HttpResponse::new(200, format!("&&&START&&&{body}"))
}

pub fn step3_ok() -> HttpResponse {
    HttpResponse::new(200, "ok").with_cookie("serviceToken", SERVICE_TOKEN)
}

/// Routes login steps by URL and hands `/app/` calls to `rpc`.
pub fn login_then<F>(rpc: F) -> impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError>
where
    F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
{
    move |request: &HttpRequest| {
        if request.url.contains("serviceLoginAuth2") {
            Ok(step2_ok())
        } else if request.url.contains("serviceLogin") {
            Ok(step1_ok())
        } else if request.url.starts_with(LOCATION) {
            Ok(step3_ok())
        } else {
            rpc(request)
        }
    }
}

/// Encrypts `reply` the way the API does, keyed by the request's `_nonce`.
pub fn encrypted_reply(request: &HttpRequest, reply: &Value) -> HttpResponse {
    let nonce = request.form.get("_nonce").expect("request carries _nonce");
    let signed_nonce = crypto::signed_nonce(SSECURITY, nonce).expect("signed nonce");
    let body = crypto::encrypt_b64(&signed_nonce, &reply.to_string()).expect("encrypt");
    HttpResponse::new(200, body)
}

/// Decrypts the `data` field of an encrypted request.
pub fn request_data(request: &HttpRequest) -> Value {
    let nonce = request.form.get("_nonce").expect("request carries _nonce");
    let signed_nonce = crypto::signed_nonce(SSECURITY, nonce).expect("signed nonce");
    let data = request.form.get("data").expect("request carries data");
    let plain = crypto::decrypt_b64(&signed_nonce, data).expect("decrypt");
    serde_json::from_slice(&plain).expect("data is json")
}

pub async fn logged_in_client(factory: Arc<ScriptedFactory>) -> MiCloudClient {
    MiCloudClient::connect(credentials(), Arc::new(ClientConfig::default()), factory)
        .await
        .expect("login succeeds")
}
