use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::auth::{SessionToken, SESSION_COOKIE};
use crate::error::{CiRerunError, Result};

/// HTTP verb used for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    /// GET whose body is read chunk by chunk instead of buffered in one go.
    GetStreaming,
    Post,
}

/// Everything a single request produced.
#[derive(Debug)]
pub struct RawResponse {
    pub body: Vec<u8>,
    pub status: u16,
    pub session: Option<SessionToken>,
    pub text: String,
}

/// Issues exactly one HTTP request per call. No retries happen here.
///
/// Certificate verification is controlled by `accept_invalid_certs`. TeamCity
/// servers on internal networks commonly run with self-signed certificates, so
/// the tool's default configuration turns verification off. This is a trust
/// decision about the CI server, and it can be switched back on from the
/// configuration file or with `--verify-tls`.
pub struct Transport {
    client: Client,
    accept_invalid_certs: bool,
}

impl Transport {
    pub fn new(accept_invalid_certs: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cirerun/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| CiRerunError::Config(format!("Failed to create HTTP client: {e}")))?;

        if accept_invalid_certs {
            debug!("TLS certificate verification disabled");
        }

        Ok(Self {
            client,
            accept_invalid_certs,
        })
    }

    pub fn accepts_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    /// Sends one request and reads the whole response.
    ///
    /// When `session` is given it is sent as the session cookie and echoed back
    /// in the response; otherwise the token is taken from the response's
    /// `Set-Cookie` header when the server issued one. The response is dropped,
    /// releasing its connection, before this returns.
    pub async fn send(
        &self,
        url: &Url,
        method: Method,
        body: Option<&str>,
        mut headers: HeaderMap,
        session: Option<&SessionToken>,
        timeout: Duration,
    ) -> std::result::Result<RawResponse, reqwest::Error> {
        if let Some(token) = session {
            if let Ok(value) = HeaderValue::from_str(&token.cookie_header()) {
                headers.insert(COOKIE, value);
            }
        }

        let request = match method {
            Method::Get | Method::GetStreaming => self.client.get(url.clone()),
            Method::Post => self.client.post(url.clone()),
        };

        let mut request = request.headers(headers).timeout(timeout);
        if let Some(body) = body {
            request = request.body(body.to_owned());
        }

        let mut response = request.send().await?;
        let status = response.status().as_u16();

        let session = match session {
            Some(token) => Some(token.clone()),
            None => response
                .cookies()
                .find(|cookie| cookie.name() == SESSION_COOKIE)
                .map(|cookie| SessionToken::from(cookie.value())),
        };

        let body = match method {
            Method::GetStreaming => {
                let mut body = Vec::new();
                while let Some(chunk) = response.chunk().await? {
                    body.extend_from_slice(&chunk);
                }
                body
            }
            Method::Get | Method::Post => response.bytes().await?.to_vec(),
        };

        debug!("HTTP {status} ({} bytes) from {}", body.len(), url.path());

        let text = String::from_utf8_lossy(&body).into_owned();

        Ok(RawResponse {
            body,
            status,
            session,
            text,
        })
    }
}
