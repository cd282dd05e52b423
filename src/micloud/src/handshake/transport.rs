use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, warn};

use crate::params::OrderedParams;
use crate::session::TransportIdentity;

/// SDK version cookie the account service expects from the Android app.
pub const SDK_VERSION: &str = "accountsdk-18.8.15";

/// Cookie domains that receive the transport identity cookies.
pub const COOKIE_DOMAINS: [&str; 2] = ["mi.com", "xiaomi.com"];

/// Network-level failures. Never retried by this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// One outgoing request. `form` is sent as an urlencoded body on POST.
#[derive(Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub form: OrderedParams,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            cookies: Vec::new(),
            form: OrderedParams::new(),
            timeout,
        }
    }

    pub fn post(url: impl Into<String>, form: OrderedParams, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            cookies: Vec::new(),
            form,
            timeout,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn cookie_value(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

// Cookies and form values carry tokens; only the shape is printed.
impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("cookies", &self.cookies.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("form", &self.form.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Status, body and the cookies set by the response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub cookies: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            cookies: Vec::new(),
        }
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A single HTTP connection context: one cookie jar, one identity.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Opens a fresh transport for every login attempt so that cookies, device id
/// and user agent are replaced as a whole.
pub trait TransportFactory: Send + Sync {
    fn open(&self, identity: &TransportIdentity) -> Result<Arc<dyn HttpTransport>, TransportError>;
}

/// `reqwest` transport with an in-memory cookie jar.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    jar: Arc<Jar>,
}

impl ReqwestTransport {
    /// Builds a client whose jar already holds the SDK version and device id
    /// cookies for both vendor domains.
    pub fn open(identity: &TransportIdentity) -> Result<Self, TransportError> {
        let jar = Arc::new(Jar::default());
        for domain in COOKIE_DOMAINS {
            let url = Url::parse(&format!("https://{domain}/"))
                .map_err(|e| TransportError::Request(e.to_string()))?;
            jar.add_cookie_str(&format!("sdkVersion={SDK_VERSION}; Domain={domain}; Path=/"), &url);
            jar.add_cookie_str(
                &format!("deviceId={}; Domain={domain}; Path=/", identity.device_id),
                &url,
            );
        }
        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client, jar })
    }

    fn headers_for(&self, request: &HttpRequest, url: &Url) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("invalid header dropped: {}", name),
            }
        }

        // Explicit cookies suppress the jar in reqwest, so merge them here.
        let mut cookie_line: Vec<String> = Vec::new();
        if let Some(stored) = self.jar.cookies(url) {
            if let Ok(stored) = stored.to_str() {
                cookie_line.extend(
                    stored
                        .split("; ")
                        .filter(|pair| {
                            let name = pair.split('=').next().unwrap_or_default();
                            request.cookie_value(name).is_none()
                        })
                        .map(str::to_string),
                );
            }
        }
        cookie_line.extend(request.cookies.iter().map(|(k, v)| format!("{k}={v}")));
        if !cookie_line.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&cookie_line.join("; ")) {
                headers.insert(COOKIE, value);
            }
        }
        headers
    }

    /// Appends jar cookies for `url` not already in `cookies`. Cookies set on
    /// an intermediate redirect hop only reach the jar.
    fn with_jar_cookies(
        &self,
        url: &Url,
        mut cookies: Vec<(String, String)>,
    ) -> Vec<(String, String)> {
        if let Some(stored) = self.jar.cookies(url) {
            if let Ok(stored) = stored.to_str() {
                for pair in stored.split("; ") {
                    if let Some((name, value)) = pair.split_once('=') {
                        if !cookies.iter().any(|(k, _)| k == name) {
                            cookies.push((name.to_string(), value.to_string()));
                        }
                    }
                }
            }
        }
        cookies
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = Url::parse(&request.url).map_err(|e| TransportError::Request(e.to_string()))?;
        let headers = self.headers_for(&request, &url);
        let builder = match request.method {
            HttpMethod::Get => self.client.get(url.clone()),
            HttpMethod::Post => self.client.post(url.clone()).form(&request.form),
        };

        debug!("{} {}", request.method.as_str(), url.path());
        let response = builder
            .headers(headers)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let cookies = self.with_jar_cookies(
            &url,
            response
                .cookies()
                .map(|c| (c.name().to_string(), c.value().to_string()))
                .collect(),
        );
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(HttpResponse {
            status,
            body,
            cookies,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

/// Default factory producing [`ReqwestTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestTransportFactory;

impl TransportFactory for ReqwestTransportFactory {
    fn open(&self, identity: &TransportIdentity) -> Result<Arc<dyn HttpTransport>, TransportError> {
        Ok(Arc::new(ReqwestTransport::open(identity)?))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> ReqwestTransport {
        let identity = TransportIdentity {
            device_id: "abcdef".into(),
            user_agent: "agent".into(),
        };
        ReqwestTransport::open(&identity).unwrap()
    }

    fn jar_line(transport: &ReqwestTransport, url: &str) -> String {
        let url = Url::parse(url).unwrap();
        transport
            .jar
            .cookies(&url)
            .map(|value| value.to_str().unwrap().to_string())
            .unwrap_or_default()
    }

    #[test]
    fn identity_cookies_are_set_for_both_domains() {
        let transport = transport();
        for url in [
            "https://account.xiaomi.com/pass/serviceLogin",
            "https://de.api.io.mi.com/app/home/device_list",
        ] {
            let line = jar_line(&transport, url);
            assert!(line.contains("deviceId=abcdef"), "{url}: {line}");
            assert!(line.contains(&format!("sdkVersion={SDK_VERSION}")), "{url}: {line}");
        }
        assert_eq!(jar_line(&transport, "https://example.org/"), "");
    }

    #[test]
    fn explicit_cookies_are_merged_into_one_header() {
        let transport = transport();
        let url = Url::parse("https://account.xiaomi.com/pass/serviceLogin").unwrap();
        let request = HttpRequest::get(url.as_str(), Duration::from_secs(1))
            .header("User-Agent", "agent")
            .cookie("userId", "u")
            .cookie("deviceId", "override");

        let headers = transport.headers_for(&request, &url);
        let line = headers.get(COOKIE).unwrap().to_str().unwrap();
        let pairs: Vec<&str> = line.split("; ").collect();
        assert!(pairs.contains(&"userId=u"));
        assert!(pairs.contains(&"sdkVersion=accountsdk-18.8.15"));
        assert!(pairs.contains(&"deviceId=override"));
        assert!(!pairs.contains(&"deviceId=abcdef"));
        assert_eq!(headers.get("user-agent").unwrap().to_str().unwrap(), "agent");
    }

    #[test]
    fn cookies_from_redirect_hops_are_reported() {
        let transport = transport();
        let url = Url::parse("https://sts.api.io.mi.com/sts?d=abc").unwrap();
        transport
            .jar
            .add_cookie_str("serviceToken=from-hop; Path=/", &url);

        let cookies = transport.with_jar_cookies(
            &url,
            vec![("userId".to_string(), "1".to_string())],
        );
        let find = |name: &str| {
            cookies
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(find("serviceToken"), Some("from-hop"));
        assert_eq!(find("userId"), Some("1"));
        assert_eq!(find("deviceId"), Some("abcdef"));
    }

    #[test]
    fn final_response_cookie_wins_over_jar() {
        let transport = transport();
        let url = Url::parse("https://sts.api.io.mi.com/sts").unwrap();
        transport.jar.add_cookie_str("serviceToken=stale; Path=/", &url);

        let cookies = transport.with_jar_cookies(
            &url,
            vec![("serviceToken".to_string(), "fresh".to_string())],
        );
        let tokens: Vec<_> = cookies
            .iter()
            .filter(|(k, _)| k == "serviceToken")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(tokens, vec!["fresh"]);
    }
}
