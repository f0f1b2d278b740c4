use thiserror::Error;

use crate::auth::SessionToken;
use crate::providers::teamcity::xml::XmlError;

#[derive(Error, Debug)]
pub enum CiRerunError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("REST request failed with HTTP {status} URL: {url}")]
    ApiError { status: u16, url: String },

    #[error("REST request failed with HTTP {status} URL: {url} after {retries} attempts")]
    ApiErrorAfterRetries {
        status: u16,
        url: String,
        retries: u32,
        session: Option<SessionToken>,
    },

    #[error("Could not connect to the TeamCity server at {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
        session: Option<SessionToken>,
    },

    #[error("Failed to build request payload: {0}")]
    Payload(#[from] XmlError),

    #[error("Insufficient input: an original build or a build configuration id is required")]
    InsufficientInput,

    #[error("Original build ID is invalid: {0}")]
    InvalidOriginalBuild(String),

    #[error("Original build {build} still running after {attempts} attempts. Exit without trigger")]
    StillRunning { build: String, attempts: u32 },

    #[error("Could not resolve a build configuration for original build {0}")]
    UnknownBuildType(String),

    #[error("No build link in the queue response after {attempts} attempts")]
    TriggerFailed { attempts: u32 },

    #[error("Triggered build {0} has no web URL")]
    MissingWebUrl(String),
}

impl CiRerunError {
    /// Session token still usable after this failure, if any.
    ///
    /// A non-transient HTTP failure invalidates the token; retry exhaustion and
    /// transport failures hand back whatever token was current.
    pub fn session(&self) -> Option<SessionToken> {
        match self {
            Self::ApiErrorAfterRetries { session, .. } | Self::Network { session, .. } => {
                session.clone()
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CiRerunError>;
