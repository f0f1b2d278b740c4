mod builds;
mod negotiate;
mod queue;
mod transport;

use log::{debug, error, info, warn};
use std::time::Duration;
use url::Url;

use crate::auth::{Credentials, SessionToken};
use crate::error::{CiRerunError, Result};

pub use builds::Inspection;
use negotiate::{negotiate, Exchange, Negotiated};
pub use negotiate::{DataKind, Payload};
pub use queue::{Triggered, MAX_TRIGGER_ATTEMPTS};
pub use transport::Method;
use transport::Transport;

/// Statuses retried with a sleep in between. A 401 that survives credential
/// authentication is retried as well.
const TRANSIENT_STATUSES: [u16; 4] = [500, 502, 503, 401];

const DEFAULT_ATTEMPTS: u32 = 10;
const DEFAULT_SLEEP_SECONDS: u64 = 30;
const DEFAULT_TIMEOUT_SECONDS: u64 = 180;

/// Bounds for the transient-error retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of requests before giving up on a transient status.
    pub attempts: u32,
    /// Delay between two attempts.
    pub sleep: Duration,
    /// Per-request timeout enforced by the transport.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            sleep: Duration::from_secs(DEFAULT_SLEEP_SECONDS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }
}

/// Scheme and authority of a TeamCity server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    scheme: String,
    authority: String,
}

impl ServerAddress {
    /// Reduces an address such as `https://tc.example.com/project.html` or a
    /// bare `tc.example.com:8111` to scheme and `host[:port]`. The scheme
    /// defaults to https.
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        let parsed = match Url::parse(address) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => url,
            _ => Url::parse(&format!("https://{address}"))
                .map_err(|e| CiRerunError::Config(format!("Invalid server address '{address}': {e}")))?,
        };

        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| CiRerunError::Config(format!("Server address '{address}' has no host")))?;

        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };

        Ok(Self {
            scheme: parsed.scheme().to_owned(),
            authority,
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Value for the `Origin` header, e.g. `https://tc.example.com`.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.authority)
    }

    /// URL for a REST path, with credentials embedded in the authority when
    /// given.
    pub fn url(&self, path: &str, credentials: Option<&Credentials>) -> Result<Url> {
        let raw = format!("{}/{}", self.origin(), path.trim_start_matches('/'));
        let mut url = Url::parse(&raw)
            .map_err(|e| CiRerunError::Config(format!("Invalid REST URL '{raw}': {e}")))?;

        if let Some(credentials) = credentials {
            let embed_failed =
                |()| CiRerunError::Config(format!("Cannot embed credentials into {raw}"));
            url.set_username(credentials.user()).map_err(embed_failed)?;
            url.set_password(Some(credentials.password()))
                .map_err(embed_failed)?;
        }

        Ok(url)
    }
}

/// One logical REST call.
#[derive(Debug, Clone)]
pub struct RestRequest<'a> {
    /// Path relative to the server root, e.g. `httpAuth/app/rest/buildQueue`.
    pub path: &'a str,
    pub kind: DataKind,
    /// Overrides the data kind's default verb.
    pub method: Option<Method>,
    pub body: Option<&'a str>,
}

impl<'a> RestRequest<'a> {
    pub fn get_json(path: &'a str) -> Self {
        Self {
            path,
            kind: DataKind::Json,
            method: None,
            body: None,
        }
    }

    pub fn post_xml(path: &'a str, body: &'a str) -> Self {
        Self {
            path,
            kind: DataKind::Xml,
            method: None,
            body: Some(body),
        }
    }
}

/// Successful call: decoded data plus the session to reuse next time.
#[derive(Debug)]
pub struct Reply {
    /// `None` when the 200 response body did not decode.
    pub data: Option<Payload>,
    pub session: Option<SessionToken>,
}

/// TeamCity REST client that prefers an existing session over credentials.
pub struct TeamCityClient {
    transport: Transport,
    server: ServerAddress,
    origin: String,
    credentials: Credentials,
    retry: RetryPolicy,
}

impl TeamCityClient {
    pub fn new(
        server: &str,
        credentials: Credentials,
        retry: RetryPolicy,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let server = ServerAddress::parse(server)?;
        let origin = server.origin();

        Ok(Self {
            transport: Transport::new(accept_invalid_certs)?,
            server,
            origin,
            credentials,
            retry,
        })
    }

    pub fn server(&self) -> &ServerAddress {
        &self.server
    }

    /// Whether TLS certificate verification is disabled for this server.
    pub fn accepts_invalid_certs(&self) -> bool {
        self.transport.accepts_invalid_certs()
    }

    /// Performs a REST call, retrying transient failures.
    ///
    /// With a session the cookie-only URL is tried first; a 401/403 there
    /// falls back once to credential authentication within the same attempt.
    /// Statuses 500, 502, 503 and 401 are retried after `retry.sleep` until
    /// `retry.attempts` requests were made. Any other non-200 status fails at
    /// once and invalidates the session.
    ///
    /// # Errors
    ///
    /// - [`CiRerunError::ApiErrorAfterRetries`] when the retry budget ran out
    /// - [`CiRerunError::ApiError`] for a non-transient status
    /// - [`CiRerunError::Network`] when the request could not be performed
    pub async fn call(
        &self,
        request: &RestRequest<'_>,
        session: Option<SessionToken>,
    ) -> Result<Reply> {
        let url = self.server.url(request.path, None)?;
        let auth_url = self.server.url(request.path, Some(&self.credentials))?;
        let body = request.body.map(|body| body.replace(['\n', '\r'], ""));

        debug!("REST request: {url}");
        debug!("Server: {}", self.server.authority());
        debug!("rest uri: {}", request.path);
        debug!("user: {}", self.credentials.user());
        debug!("postdata: {}", body.as_deref().unwrap_or_default());
        debug!("datatype: {:?}", request.kind);

        let mut session = session;
        let mut remaining = self.retry.attempts;

        loop {
            let response = match self
                .attempt(request, &url, &auth_url, body.as_deref(), session.as_ref())
                .await
            {
                Ok(response) => response,
                Err(source) => {
                    error!("Could not connect to the TeamCity server, rest_url={url}: {source}");
                    return Err(CiRerunError::Network {
                        url: url.to_string(),
                        source,
                        session,
                    });
                }
            };

            session = response.session;

            match response.status {
                200 => {
                    return Ok(Reply {
                        data: response.data,
                        session,
                    })
                }
                status if TRANSIENT_STATUSES.contains(&status) => {
                    remaining = remaining.saturating_sub(1);
                    warn!("REST request failed with HTTP {status} URL: {url}. Retrying...");

                    if remaining == 0 {
                        return Err(CiRerunError::ApiErrorAfterRetries {
                            status,
                            url: url.to_string(),
                            retries: self.retry.attempts,
                            session,
                        });
                    }

                    tokio::time::sleep(self.retry.sleep).await;
                }
                status => {
                    warn!("REST request failed with HTTP {status} URL: {url}");
                    debug!("Response: {}", response.text);
                    return Err(CiRerunError::ApiError {
                        status,
                        url: url.to_string(),
                    });
                }
            }
        }
    }

    /// One attempt: session cookie first if available, credentials otherwise
    /// or when the cookie is rejected.
    async fn attempt(
        &self,
        request: &RestRequest<'_>,
        url: &Url,
        auth_url: &Url,
        body: Option<&str>,
        session: Option<&SessionToken>,
    ) -> std::result::Result<Negotiated, reqwest::Error> {
        if let Some(token) = session {
            let response = self.exchange(request, url, body, Some(token)).await?;
            if !matches!(response.status, 401 | 403) {
                return Ok(response);
            }
            info!(
                "Using user/password because the session cookie failed with HTTP {}",
                response.status
            );
        }

        self.exchange(request, auth_url, body, None).await
    }

    async fn exchange(
        &self,
        request: &RestRequest<'_>,
        url: &Url,
        body: Option<&str>,
        session: Option<&SessionToken>,
    ) -> std::result::Result<Negotiated, reqwest::Error> {
        negotiate(
            &self.transport,
            Exchange {
                url,
                kind: request.kind,
                method: request.method,
                body,
                session,
                origin: &self.origin,
                timeout: self.retry.timeout,
            },
        )
        .await
    }
}
