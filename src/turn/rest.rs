//! TURN REST API credential service client.

use crate::error::FetchError;
use crate::turn::codec::IceServerSet;
use crate::turn::resolver::RestSource;
use async_trait::async_trait;
use std::time::Duration;

/// Anything that can produce a fresh document from a REST credential source.
#[async_trait]
pub trait RtcConfigFetcher: Send + Sync {
    async fn fetch(&self, source: &RestSource) -> Result<IceServerSet, FetchError>;
}

#[async_trait]
impl<T: RtcConfigFetcher + ?Sized> RtcConfigFetcher for std::sync::Arc<T> {
    async fn fetch(&self, source: &RestSource) -> Result<IceServerSet, FetchError> {
        (**self).fetch(source).await
    }
}

/// `GET <uri>` with identity, transport and TLS headers; the body is the
/// RTC config document.
#[derive(Debug, Clone)]
pub struct RestFetcher {
    client: reqwest::Client,
}

impl RestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| FetchError::Transport {
                uri: String::new(),
                source,
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RtcConfigFetcher for RestFetcher {
    async fn fetch(&self, source: &RestSource) -> Result<IceServerSet, FetchError> {
        let url = reqwest::Url::parse(&source.uri)
            .map_err(|_| FetchError::InvalidUri(source.uri.clone()))?;

        let response = self
            .client
            .get(url)
            .header(source.headers.username.as_str(), source.identity.as_str())
            .header(source.headers.protocol.as_str(), source.protocol.as_str())
            .header(
                source.headers.tls.as_str(),
                if source.tls { "true" } else { "false" },
            )
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                uri: source.uri.clone(),
                source: e,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| FetchError::Transport {
            uri: source.uri.clone(),
            source: e,
        })?;

        if status.as_u16() >= 400 {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody);
        }

        Ok(IceServerSet::parse(body)?)
    }
}
