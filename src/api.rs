// API client module: a small blocking HTTP client for the storage
// service. It covers the two calls the resumable upload needs: the
// two-legged (client credentials) token request and the ranged chunk PUT.

use crate::chunk::{ChunkRequest, ChunkResponse, ChunkTransport, CredentialProvider};
use crate::config::Config;
use crate::error::{Result, UploadError};
use crate::state::StateDir;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Scopes requested for the two-legged token.
pub const DEFAULT_SCOPE: &str =
    "data:read data:write data:create data:search bucket:create bucket:read bucket:update bucket:delete";

/// Header correlating all chunks of one upload.
pub const SESSION_ID_HEADER: &str = "Session-Id";

/// Blocking client holding the reqwest client, the service host and the
/// application keys used to request tokens.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// Response of the authentication endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.host)
            .map_err(|e| UploadError::InvalidArgument(format!("invalid host {}: {}", config.host, e)))?;
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| UploadError::transport(None, e.to_string(), "Failed to build HTTP client"))?;
        Ok(ApiClient {
            client,
            base_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| UploadError::InvalidArgument(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Request a two-legged token with `scope`.
    pub fn authenticate(&self, scope: &str) -> Result<BearerToken> {
        let (client_id, client_secret) = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => (id, secret),
            _ => {
                return Err(UploadError::CredentialError(
                    "FORGE_CLIENT_ID and FORGE_CLIENT_SECRET must be set".into(),
                ))
            }
        };
        let url = self.url(&["authentication", "v1", "authenticate"])?;
        let res = self
            .client
            .post(url)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("grant_type", "client_credentials"),
                ("scope", scope),
            ])
            .send()
            .map_err(|e| UploadError::CredentialError(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let txt = res.text().unwrap_or_default();
            return Err(UploadError::CredentialError(format!("HTTP {} - {}", status.as_u16(), txt)));
        }
        let token: BearerToken = res
            .json()
            .map_err(|e| UploadError::CredentialError(format!("parsing token response: {}", e)))?;
        debug!(expires_in = token.expires_in, "two-legged token issued");
        Ok(token)
    }

    /// `PUT /oss/v2/buckets/{bucket}/objects/{object}/resumable` carrying one
    /// range, ready to send.
    pub fn chunk_request(&self, request: &ChunkRequest<'_>, token: &str) -> Result<RequestBuilder> {
        let target = request.target;
        let url = self.url(&[
            "oss",
            "v2",
            "buckets",
            &target.bucket_key,
            "objects",
            &target.object_key,
            "resumable",
        ])?;
        Ok(self
            .client
            .put(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, request.body.len())
            .header(CONTENT_RANGE, request.content_range())
            .header(SESSION_ID_HEADER, request.session_id)
            .body(request.body.to_vec()))
    }
}

impl ChunkTransport for ApiClient {
    fn send_chunk(&self, request: &ChunkRequest<'_>, token: &str) -> Result<ChunkResponse> {
        let res = self
            .chunk_request(request, token)?
            .send()
            .map_err(|e| UploadError::transport(None, e.to_string(), "Failed to send chunk"))?;
        let status = res.status().as_u16();
        let body = res
            .text()
            .map_err(|e| UploadError::transport(Some(status), e.to_string(), "Failed to read chunk response"))?;
        Ok(ChunkResponse { status, body })
    }
}

/// Two-legged credentials that also keep the working directory's
/// `access_token` file current, so other commands can reuse the last token.
pub struct TwoLegged<'a> {
    api: &'a ApiClient,
    state: &'a StateDir,
    scope: String,
}

impl<'a> TwoLegged<'a> {
    pub fn new(api: &'a ApiClient, state: &'a StateDir) -> Self {
        TwoLegged {
            api,
            state,
            scope: DEFAULT_SCOPE.into(),
        }
    }
}

impl CredentialProvider for TwoLegged<'_> {
    fn access_token(&self) -> Result<String> {
        match self.api.authenticate(&self.scope) {
            Ok(token) => {
                if let Err(e) = self.state.save_access_token(&token.token_type, &token.access_token) {
                    warn!(error = %e, "could not store access token");
                }
                Ok(token.access_token)
            }
            Err(e) => {
                if let Err(clear) = self.state.clear_access_token() {
                    warn!(error = %clear, "could not remove stale access token");
                }
                Err(e)
            }
        }
    }
}
