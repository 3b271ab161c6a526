use crate::error::ConfigError;
use crate::turn::codec::{StunEndpoint, TurnEndpoint, TurnProtocol};
use crate::turn::resolver::{HmacSource, LegacySource, RestHeaders, RestSource, SourceCandidates};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

fn default_rest_username() -> String {
    format!("icewarden-{}", gethostname::gethostname().to_string_lossy())
}

/// Command-line flags, each backed by an environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "icewarden", version, about)]
pub struct Settings {
    /// JSON file with key-value overrides written at runtime; must be writable.
    #[arg(long, env = "JSON_CONFIG", default_value = "/tmp/icewarden_config.json")]
    pub json_config: PathBuf,

    /// Host the config endpoint listens on.
    #[arg(long, env = "LISTEN_HOST", default_value = "0.0.0.0")]
    pub addr: String,

    #[arg(long, env = "LISTEN_PORT", default_value_t = 8080)]
    pub port: u16,

    /// RTC config JSON file; when present it overrides every other source.
    #[arg(long, env = "RTC_CONFIG_JSON", default_value = "/tmp/rtc.json")]
    pub rtc_config_json: PathBuf,

    /// TURN REST API service, for example http://localhost:8008
    #[arg(long, env = "TURN_REST_URI", default_value = "")]
    pub turn_rest_uri: String,

    #[arg(long, env = "TURN_REST_USERNAME", default_value_t = default_rest_username())]
    pub turn_rest_username: String,

    #[arg(long, env = "TURN_REST_USERNAME_AUTH_HEADER", default_value = "x-auth-user")]
    pub turn_rest_username_auth_header: String,

    #[arg(long, env = "TURN_REST_PROTOCOL_HEADER", default_value = "x-turn-protocol")]
    pub turn_rest_protocol_header: String,

    #[arg(long, env = "TURN_REST_TLS_HEADER", default_value = "x-turn-tls")]
    pub turn_rest_tls_header: String,

    /// Shared secret for HMAC credentials; also requires TURN host and port.
    #[arg(long, env = "TURN_SHARED_SECRET", default_value = "")]
    pub turn_shared_secret: String,

    /// Long-term username; also requires TURN host and port.
    #[arg(long, env = "TURN_USERNAME", default_value = "")]
    pub turn_username: String,

    #[arg(long, env = "TURN_PASSWORD", default_value = "")]
    pub turn_password: String,

    #[arg(long, env = "TURN_HOST", default_value = "")]
    pub turn_host: String,

    #[arg(long, env = "TURN_PORT", default_value = "")]
    pub turn_port: String,

    /// "udp" or "tcp"
    #[arg(long, env = "TURN_PROTOCOL", default_value = "udp")]
    pub turn_protocol: String,

    /// TURN over TLS (tcp) or DTLS (udp).
    #[arg(long, env = "TURN_TLS", default_value = "false", action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub turn_tls: bool,

    #[arg(long, env = "STUN_HOST", default_value = "stun.l.google.com")]
    pub stun_host: String,

    #[arg(long, env = "STUN_PORT", default_value = "19302")]
    pub stun_port: String,

    /// Relay-only deployment; STUN servers are withheld from clients.
    #[arg(long, env = "STUNNER", default_value = "false", action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub stunner: bool,

    /// Server side only gathers host candidates, live STUN/TURN updates are skipped.
    #[arg(long, env = "ASYMMETRIC_ICE_MODE", default_value = "false", action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub asymmetric_ice_mode: bool,

    #[arg(long, env = "ENABLE_SECONDARY", default_value = "false", action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub enable_secondary: bool,

    #[arg(long, env = "APP_WAIT_READY", default_value = "false", action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub app_wait_ready: bool,

    #[arg(long, env = "APP_READY_FILE", default_value = "/tmp/icewarden-appready")]
    pub app_ready_file: PathBuf,

    #[arg(long, env = "AGENT_SOCKET", default_value = "/run/icewarden/agent.sock")]
    pub agent_socket: PathBuf,

    /// Seconds between REST/HMAC credential refreshes.
    #[arg(long, env = "RTC_REFRESH_PERIOD", default_value_t = 60)]
    pub refresh_period_sec: u64,

    /// Seconds between environment variable checks.
    #[arg(long, env = "ENV_POLL_PERIOD", default_value_t = 15)]
    pub env_poll_period_sec: u64,

    #[arg(long, env = "REST_TIMEOUT_SEC", default_value_t = 10)]
    pub rest_timeout_sec: u64,

    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.turn_host.is_empty() && !self.turn_port.is_empty() {
            self.turn_port.parse::<u16>().map_err(|_| {
                ConfigError(format!("Invalid TURN_PORT: {}", self.turn_port))
            })?;
        }

        if !self.turn_rest_uri.is_empty()
            && !(self.turn_rest_uri.starts_with("http://")
                || self.turn_rest_uri.starts_with("https://"))
        {
            return Err(ConfigError(format!(
                "Invalid TURN_REST_URI: {} (must start with http:// or https://)",
                self.turn_rest_uri
            )));
        }

        if self.refresh_period_sec < 5 || self.refresh_period_sec > 86_400 {
            return Err(ConfigError(format!(
                "Invalid RTC_REFRESH_PERIOD: {} (must be between 5 and 86400)",
                self.refresh_period_sec
            )));
        }

        if self.env_poll_period_sec == 0 || self.env_poll_period_sec > 3600 {
            return Err(ConfigError(format!(
                "Invalid ENV_POLL_PERIOD: {} (must be between 1 and 3600)",
                self.env_poll_period_sec
            )));
        }

        if self.rest_timeout_sec == 0 || self.rest_timeout_sec > 300 {
            return Err(ConfigError(format!(
                "Invalid REST_TIMEOUT_SEC: {} (must be between 1 and 300)",
                self.rest_timeout_sec
            )));
        }

        Ok(())
    }

    /// Applies overrides persisted in the JSON settings file. Unknown keys are ignored.
    pub fn apply_overrides(&mut self, overrides: &Map<String, Value>) {
        for (key, value) in overrides {
            match key.as_str() {
                "enable_secondary" => {
                    if let Some(enabled) = as_bool(value) {
                        self.enable_secondary = enabled;
                    }
                }
                "turn_protocol" => {
                    if let Some(protocol) = value.as_str() {
                        self.turn_protocol = protocol.to_lowercase();
                    }
                }
                _ => {}
            }
        }
    }

    pub fn turn_protocol(&self) -> TurnProtocol {
        TurnProtocol::from_setting(&self.turn_protocol)
    }

    /// `:` is not allowed in the REST identity since it separates expiry and user.
    pub fn rest_identity(&self) -> String {
        self.turn_rest_username.replace(':', "-")
    }

    pub fn turn_endpoint(&self) -> Option<TurnEndpoint> {
        if self.turn_host.is_empty() || self.turn_port.is_empty() {
            return None;
        }
        Some(TurnEndpoint {
            host: self.turn_host.clone(),
            port: self.turn_port.parse().ok()?,
            protocol: self.turn_protocol(),
            tls: self.turn_tls,
        })
    }

    pub fn stun_endpoint(&self) -> Option<StunEndpoint> {
        if self.stun_host.is_empty() {
            return None;
        }
        Some(StunEndpoint::new(
            self.stun_host.clone(),
            self.stun_port.parse().ok()?,
        ))
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period_sec)
    }

    pub fn env_poll_period(&self) -> Duration {
        Duration::from_secs(self.env_poll_period_sec)
    }

    pub fn rest_timeout(&self) -> Duration {
        Duration::from_secs(self.rest_timeout_sec)
    }

    /// Every credential source the current settings make available.
    pub fn source_candidates(&self) -> SourceCandidates {
        let rest = (!self.turn_rest_uri.is_empty()).then(|| RestSource {
            uri: self.turn_rest_uri.clone(),
            identity: self.rest_identity(),
            headers: RestHeaders {
                username: self.turn_rest_username_auth_header.clone(),
                protocol: self.turn_rest_protocol_header.clone(),
                tls: self.turn_rest_tls_header.clone(),
            },
            protocol: self.turn_protocol(),
            tls: self.turn_tls,
        });

        let turn = self.turn_endpoint();

        let legacy = match &turn {
            Some(turn) if !self.turn_username.is_empty() && !self.turn_password.is_empty() => {
                Some(LegacySource {
                    turn: turn.clone(),
                    username: self.turn_username.clone(),
                    password: self.turn_password.clone(),
                    relay_only: self.stunner,
                    stun: self.stun_endpoint(),
                })
            }
            _ => None,
        };

        let hmac = match &turn {
            Some(turn) if !self.turn_shared_secret.is_empty() => Some(HmacSource {
                turn: turn.clone(),
                shared_secret: self.turn_shared_secret.clone(),
                identity: self.rest_identity(),
                stun: self.stun_endpoint(),
            }),
            _ => None,
        };

        SourceCandidates {
            rtc_config_file: Some(self.rtc_config_json.clone()),
            rest,
            legacy,
            hmac,
        }
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(s.eq_ignore_ascii_case("true")),
        _ => None,
    }
}
