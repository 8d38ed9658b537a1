//! Seam to the authentication collaborator.
//!
//! Session negotiation with the radio service happens elsewhere; the
//! pipeline only consumes the resulting token and area id.

use async_trait::async_trait;

use crate::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub auth_token: String,
    pub area_id: String,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Credentials valid for playlist requests of `station_id`.
    ///
    /// Errors surface as [`PipelineError::AuthExpired`].
    async fn credentials(&self, station_id: &str) -> Result<Credentials, PipelineError>;
}

/// Credentials handed in from configuration, identical for every station.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(auth_token: impl Into<String>, area_id: impl Into<String>) -> Self {
        Self {
            credentials: Credentials {
                auth_token: auth_token.into(),
                area_id: area_id.into(),
            },
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self, station_id: &str) -> Result<Credentials, PipelineError> {
        if self.credentials.auth_token.is_empty() {
            return Err(PipelineError::AuthExpired {
                reason: format!("no auth token configured for station {station_id}"),
            });
        }
        Ok(self.credentials.clone())
    }
}
