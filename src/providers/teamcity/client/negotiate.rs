use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::transport::{Method, Transport};
use crate::auth::SessionToken;
use crate::providers::teamcity::xml;

/// Shape of the data expected back from a REST call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Json,
    Xml,
    Text,
    Binary,
}

impl DataKind {
    /// Verb used when the caller does not override it.
    pub fn default_method(self) -> Method {
        match self {
            Self::Json | Self::Text => Method::Get,
            Self::Xml => Method::Post,
            Self::Binary => Method::GetStreaming,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml",
            Self::Text => "text/plain",
            Self::Binary => "application/zip",
        }
    }

    fn accept(self) -> &'static str {
        match self {
            Self::Binary => "application/octet-stream",
            other => other.content_type(),
        }
    }

    fn headers(self, origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type()));
        headers.insert(ACCEPT, HeaderValue::from_static(self.accept()));
        if let Ok(origin) = HeaderValue::from_str(origin) {
            headers.insert(ORIGIN, origin);
        }
        headers
    }

    /// Decodes a response body; `None` means the body could not be parsed.
    pub fn decode(self, body: Vec<u8>) -> Option<Payload> {
        match self {
            Self::Json => serde_json::from_slice(&body).ok().map(Payload::Json),
            Self::Xml => {
                let text = std::str::from_utf8(&body).ok()?;
                match xml::parse_document(text) {
                    Ok(value) => Some(Payload::Xml(value)),
                    Err(e) => {
                        debug!("Discarding unparseable XML response: {e}");
                        None
                    }
                }
            }
            Self::Text => {
                let mut text = String::from_utf8(body).ok()?;
                if text.ends_with('\n') {
                    text.pop();
                }
                Some(Payload::Text(text))
            }
            Self::Binary => Some(Payload::Binary(body)),
        }
    }
}

/// Decoded response data.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// XML flattened into a mapping, see [`xml::parse_document`].
    Xml(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Structured view for JSON and XML payloads.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Json(value) | Self::Xml(value) => Some(value),
            Self::Text(_) | Self::Binary(_) => None,
        }
    }
}

/// Result of one negotiated request.
#[derive(Debug)]
pub struct Negotiated {
    /// `None` when the body did not decode as the requested kind.
    pub data: Option<Payload>,
    pub status: u16,
    pub session: Option<SessionToken>,
    pub text: String,
}

/// Parameters of one negotiated request.
pub struct Exchange<'a> {
    pub url: &'a Url,
    pub kind: DataKind,
    pub method: Option<Method>,
    pub body: Option<&'a str>,
    pub session: Option<&'a SessionToken>,
    pub origin: &'a str,
    pub timeout: Duration,
}

/// Picks headers and verb for the data kind, sends the request and decodes
/// the body. Transport errors propagate unchanged.
pub async fn negotiate(
    transport: &Transport,
    exchange: Exchange<'_>,
) -> std::result::Result<Negotiated, reqwest::Error> {
    let url = strip_legacy_auth_prefix(exchange.url);
    let method = exchange
        .method
        .unwrap_or_else(|| exchange.kind.default_method());

    let response = transport
        .send(
            &url,
            method,
            exchange.body,
            exchange.kind.headers(exchange.origin),
            exchange.session,
            exchange.timeout,
        )
        .await?;

    Ok(Negotiated {
        data: exchange.kind.decode(response.body),
        status: response.status,
        session: response.session,
        text: response.text,
    })
}

/// Old TeamCity paths start with `/httpAuth/`; the plain path accepts both
/// Basic credentials and the session cookie.
fn strip_legacy_auth_prefix(url: &Url) -> Url {
    let path = url.path();
    if !path.contains("/httpAuth/") {
        return url.clone();
    }

    let mut rewritten = url.clone();
    rewritten.set_path(&path.replace("/httpAuth/", "/"));
    rewritten
}
