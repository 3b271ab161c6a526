//! Startup selection of the credential source.
//!
//! Sources are evaluated in strict priority order and the first applicable
//! one wins: file > REST > legacy > HMAC > default.

use crate::error::{FetchError, ParseError};
use crate::turn::codec::{self, IceServerSet, StunEndpoint, TurnEndpoint, TurnProtocol};
use crate::turn::credentials::generate_turn_credentials;
use crate::turn::rest::RtcConfigFetcher;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Header names used when talking to the REST credential service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestHeaders {
    pub username: String,
    pub protocol: String,
    pub tls: String,
}

impl Default for RestHeaders {
    fn default() -> Self {
        Self {
            username: "x-auth-user".to_string(),
            protocol: "x-turn-protocol".to_string(),
            tls: "x-turn-tls".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestSource {
    pub uri: String,
    pub identity: String,
    pub headers: RestHeaders,
    pub protocol: TurnProtocol,
    pub tls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacySource {
    pub turn: TurnEndpoint,
    pub username: String,
    pub password: String,
    pub relay_only: bool,
    pub stun: Option<StunEndpoint>,
}

impl LegacySource {
    pub fn build(&self) -> Result<IceServerSet, ParseError> {
        let raw = codec::build_legacy(
            &self.turn,
            &self.username,
            &self.password,
            self.relay_only,
            self.stun.as_ref(),
        )?;
        IceServerSet::parse(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmacSource {
    pub turn: TurnEndpoint,
    pub shared_secret: String,
    pub identity: String,
    pub stun: Option<StunEndpoint>,
}

impl HmacSource {
    /// Derives a fresh time-windowed credential and builds the document.
    pub fn build(&self) -> Result<IceServerSet, FetchError> {
        let credentials = generate_turn_credentials(&self.shared_secret, &self.identity)
            .map_err(FetchError::Credential)?;
        let raw = codec::build_hmac(&self.turn, &credentials, self.stun.as_ref())?;
        Ok(IceServerSet::parse(raw)?)
    }
}

/// The one source active for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    File(PathBuf),
    RestApi(RestSource),
    Legacy(LegacySource),
    Hmac(HmacSource),
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    File,
    RestApi,
    Legacy,
    Hmac,
    Default,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::File => write!(f, "file"),
            SourceKind::RestApi => write!(f, "rest"),
            SourceKind::Legacy => write!(f, "legacy"),
            SourceKind::Hmac => write!(f, "hmac"),
            SourceKind::Default => write!(f, "default"),
        }
    }
}

impl CredentialSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            CredentialSource::File(_) => SourceKind::File,
            CredentialSource::RestApi(_) => SourceKind::RestApi,
            CredentialSource::Legacy(_) => SourceKind::Legacy,
            CredentialSource::Hmac(_) => SourceKind::Hmac,
            CredentialSource::Default => SourceKind::Default,
        }
    }
}

/// Every source the configuration makes available, before precedence is applied.
#[derive(Debug, Clone, Default)]
pub struct SourceCandidates {
    pub rtc_config_file: Option<PathBuf>,
    pub rest: Option<RestSource>,
    pub legacy: Option<LegacySource>,
    pub hmac: Option<HmacSource>,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub source: CredentialSource,
    pub initial: IceServerSet,
}

pub struct ConfigResolver<F> {
    fetcher: F,
}

impl<F: RtcConfigFetcher> ConfigResolver<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Picks the active source and produces the bootstrap configuration.
    ///
    /// A REST outage falls through to the remaining sources. Only a broken
    /// built-in default document can make this fail.
    pub async fn resolve(&self, candidates: SourceCandidates) -> Result<Resolution, ParseError> {
        if let Some(path) = candidates.rtc_config_file.filter(|p| p.exists()) {
            warn!(
                "using JSON file from argument for RTC config, overrides all other STUN/TURN configuration"
            );
            let initial = match read_config_file(&path) {
                Ok(set) => set,
                Err(e) => {
                    // The file stays authoritative; a corrected write is picked up by the watcher.
                    warn!("could not read RTC JSON file {}: {}, using default until it changes", path.display(), e);
                    IceServerSet::fallback()?
                }
            };
            return Ok(Resolution {
                source: CredentialSource::File(path),
                initial,
            });
        }

        if let Some(rest) = candidates.rest {
            match self.fetcher.fetch(&rest).await {
                Ok(initial) => {
                    info!("using TURN REST API RTC configuration, overrides long-term username/password or short-term shared secret STUN/TURN configuration");
                    return Ok(Resolution {
                        source: CredentialSource::RestApi(rest),
                        initial,
                    });
                }
                Err(e) => {
                    warn!(
                        "error fetching TURN REST API RTC configuration, falling back to other methods: {}",
                        e
                    );
                }
            }
        }

        if let Some(legacy) = candidates.legacy {
            match legacy.build() {
                Ok(initial) => {
                    info!("using TURN long-term username/password credentials, prioritized over short-term shared secret configuration");
                    return Ok(Resolution {
                        source: CredentialSource::Legacy(legacy),
                        initial,
                    });
                }
                Err(e) => warn!("could not build legacy TURN configuration: {}", e),
            }
        }

        if let Some(hmac) = candidates.hmac {
            match hmac.build() {
                Ok(initial) => {
                    info!("using TURN short-term shared secret HMAC credentials");
                    return Ok(Resolution {
                        source: CredentialSource::Hmac(hmac),
                        initial,
                    });
                }
                Err(e) => warn!("could not build HMAC TURN configuration: {}", e),
            }
        }

        warn!("missing TURN server information, using default RTC config");
        Ok(Resolution {
            source: CredentialSource::Default,
            initial: IceServerSet::fallback()?,
        })
    }
}

pub fn read_config_file(path: &Path) -> Result<IceServerSet, FetchError> {
    let data = std::fs::read_to_string(path).map_err(|source| FetchError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(IceServerSet::parse(data)?)
}
