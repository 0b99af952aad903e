use anyhow::{anyhow, Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::error::LrmError;
use crate::history::{HistoryEntry, HistoryPage};
use crate::snapshot::{Snapshot, SnapshotPage};

use super::retry::RetryPolicy;
use super::{
    PullRequest, PullResponse, PushRequest, PushResponse, RemoteService, RemoteState,
    RevertRequest, RevertResponse,
};

/// JSON-over-HTTP client for the remote sync service.
#[derive(Clone)]
pub struct HttpRemote {
    endpoint: String,
    client: Client,
    token: Option<String>,
    retry: RetryPolicy,
}

impl fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
    current_version: Option<u64>,
    limit: Option<usize>,
}

fn parse_api_error(status: u16, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status);
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("{trimmed} ({status})")
    }
}

/// Map a non-success response to the typed error the sync client branches on.
fn map_status(status: u16, body: &str, base_version: Option<u64>) -> LrmError {
    let payload = serde_json::from_str::<ApiErrorBody>(body).ok();
    match status {
        409 => LrmError::VersionMismatch {
            expected: base_version.unwrap_or_default(),
            actual: payload
                .and_then(|p| p.current_version)
                .unwrap_or_default(),
        },
        401 | 403 => LrmError::Unauthorized(parse_api_error(status, body)),
        402 => LrmError::SnapshotQuotaExceeded {
            limit: payload.and_then(|p| p.limit).unwrap_or_default(),
        },
        404 => LrmError::NotFound(parse_api_error(status, body)),
        408 | 429 | 500..=599 => LrmError::Transient(parse_api_error(status, body)),
        _ => LrmError::Remote {
            status,
            message: parse_api_error(status, body),
        },
    }
}

fn map_transport(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        LrmError::Transient(err.to_string()).into()
    } else {
        anyhow::Error::new(err).context("Remote request failed")
    }
}

fn normalize_endpoint(raw: &str) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(anyhow!("remote_url must not be empty"));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(anyhow!("remote_url must include http:// or https://"))
    }
}

/// Ids are interpolated into URL paths.
fn checked_id(id: &str) -> Result<&str> {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(id)
    } else {
        Err(anyhow!("Invalid id '{id}'"))
    }
}

impl HttpRemote {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            endpoint,
            client,
            token,
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn execute<F>(&self, what: &str, base_version: Option<u64>, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.retry.run(what, || {
            let response = self
                .authorize(build(&self.client))
                .send()
                .map_err(map_transport)?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let body = response.text().unwrap_or_default();
            Err(map_status(status.as_u16(), &body, base_version).into())
        })
    }

    fn json<T: DeserializeOwned>(what: &str, response: Response) -> Result<T> {
        response
            .json::<T>()
            .with_context(|| format!("Invalid response payload for {what}"))
    }
}

impl RemoteService for HttpRemote {
    fn state(&self) -> Result<RemoteState> {
        let url = self.url("state");
        let response = self.execute("state", None, |client| client.get(&url))?;
        Self::json("state", response)
    }

    fn push(&self, request: &PushRequest) -> Result<PushResponse> {
        let url = self.url("push");
        let response = self.execute("push", Some(request.base_version), |client| {
            client.post(&url).json(request)
        })?;
        Self::json("push", response)
    }

    fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
        let url = self.url("pull");
        let response = self.execute("pull", None, |client| client.post(&url).json(request))?;
        Self::json("pull", response)
    }

    fn history(&self, page: usize, page_size: usize) -> Result<HistoryPage> {
        let url = self.url(&format!("history?page={page}&page_size={page_size}"));
        let response = self.execute("history", None, |client| client.get(&url))?;
        Self::json("history", response)
    }

    fn history_entry(&self, id: &str) -> Result<HistoryEntry> {
        let url = self.url(&format!("history/{}", checked_id(id)?));
        let response = self.execute("history entry", None, |client| client.get(&url))?;
        Self::json("history entry", response)
    }

    fn revert(&self, id: &str, request: &RevertRequest) -> Result<RevertResponse> {
        let url = self.url(&format!("revert/{}", checked_id(id)?));
        let response = self.execute("revert", request.base_version, |client| {
            client.post(&url).json(request)
        })?;
        Self::json("revert", response)
    }

    fn create_snapshot(&self, message: Option<&str>, actor: &str) -> Result<Snapshot> {
        let url = self.url("snapshots");
        let body = serde_json::json!({ "message": message, "actor": actor });
        let response = self.execute("create snapshot", None, |client| {
            client.post(&url).json(&body)
        })?;
        Self::json("create snapshot", response)
    }

    fn list_snapshots(&self, page: usize, page_size: usize) -> Result<SnapshotPage> {
        let url = self.url(&format!("snapshots?page={page}&page_size={page_size}"));
        let response = self.execute("list snapshots", None, |client| client.get(&url))?;
        Self::json("list snapshots", response)
    }

    fn get_snapshot(&self, id: &str) -> Result<Snapshot> {
        let url = self.url(&format!("snapshots/{}", checked_id(id)?));
        let response = self.execute("get snapshot", None, |client| client.get(&url))?;
        Self::json("get snapshot", response)
    }

    fn delete_snapshot(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("snapshots/{}", checked_id(id)?));
        self.execute("delete snapshot", None, |client| client.delete(&url))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert!(normalize_endpoint("  ").is_err());
        assert!(normalize_endpoint("api.example.com").is_err());
        assert_eq!(
            normalize_endpoint("https://api.example.com/v1/projects/demo/").unwrap(),
            "https://api.example.com/v1/projects/demo"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let remote = HttpRemote::new(
            "https://api.example.com",
            Some("secret".to_string()),
            Duration::from_secs(5),
            RetryPolicy::default(),
        )
        .unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_conflict_status_maps_to_version_mismatch() {
        let err = map_status(409, r#"{"current_version": 7}"#, Some(5));
        assert!(matches!(
            err,
            LrmError::VersionMismatch {
                expected: 5,
                actual: 7
            }
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_status_classes() {
        assert!(map_status(503, "", None).is_transient());
        assert!(map_status(429, "", None).is_transient());
        assert!(matches!(map_status(401, "", None), LrmError::Unauthorized(_)));
        assert!(matches!(map_status(404, "", None), LrmError::NotFound(_)));
        assert!(matches!(
            map_status(402, r#"{"limit": 10}"#, None),
            LrmError::SnapshotQuotaExceeded { limit: 10 }
        ));
        assert!(matches!(
            map_status(400, r#"{"message": "bad file"}"#, None),
            LrmError::Remote { status: 400, message } if message == "bad file (400)"
        ));
    }

    #[test]
    fn test_ids_are_checked() {
        assert!(checked_id("3f2a-91bc").is_ok());
        assert!(checked_id("../state").is_err());
        assert!(checked_id("").is_err());
    }
}
