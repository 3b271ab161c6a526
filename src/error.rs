//! Error kinds shared across credential sources, monitors and sessions.

use thiserror::Error;

/// Failure reaching a credential source. The cycle is skipped and the
/// previous configuration stays in effect.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {uri} failed: {source}")]
    Transport {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("error fetching REST API config. Status code: {status}. {reason}, {body}")]
    Status {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("data from REST API service was empty")]
    EmptyBody,

    #[error("invalid REST API uri {0}")]
    InvalidUri(String),

    #[error("could not derive TURN credentials: {0}")]
    Credential(String),

    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Malformed or incomplete ICE configuration document. Never partially applied.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid RTC config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed ICE server url {0:?}")]
    MalformedUrl(String),

    #[error("TURN url {url:?} is missing the {field} field")]
    MissingCredential { url: String, field: &'static str },
}

/// Errors surfaced by the signaling layer of a peer session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    /// The remote peer has not joined yet; call setup is retried after a delay.
    #[error("remote peer not connected yet")]
    NoPeer,

    #[error("signaling failed: {0}")]
    Fatal(String),
}

/// Failure persisting a locally overridden setting.
#[derive(Debug, Error)]
pub enum ConfigWriteError {
    #[error("could not write settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is not a JSON object: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Invalid command-line or environment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);
