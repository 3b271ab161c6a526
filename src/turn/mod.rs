// TURN/STUN configuration module
//
// This module turns the configured credential sources (static file, REST
// credential service, long-term username/password, HMAC shared secret) into
// ICE server documents and the discrete STUN/TURN URIs a live transport needs.

pub mod codec;
pub mod config;
pub mod credentials;
pub mod resolver;
pub mod rest;


// Re-export commonly used types
pub use codec::{IceServerSet, StunEndpoint, TurnEndpoint, TurnProtocol, DEFAULT_RTC_CONFIG};
pub use config::Settings;
pub use credentials::{generate_turn_credentials, TurnCredentials};
pub use resolver::{ConfigResolver, CredentialSource, Resolution, SourceCandidates, SourceKind};
pub use rest::{RestFetcher, RtcConfigFetcher};
