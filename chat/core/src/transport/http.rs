//! HTTP Transport
//!
//! Talks to the persona chat REST backend.
//!
//! # Endpoints
//!
//! - `POST {base}/api/v1/chats/{chat_id}/messages/stream` - send a message,
//!   response body is the `data: ` line stream
//! - `GET {base}/api/v1/chats/{chat_id}` - chat detail with its history
//!
//! Non-success responses carry a JSON body whose `detail` field explains
//! the failure. It is surfaced verbatim in [`TransportError::Status`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, Url};
use serde_json::Value;

use super::auth::CredentialProvider;
use super::traits::{ByteStream, ChatTransport, StreamRequest};
use crate::error::{TransportError, GENERIC_FAILURE_DETAIL};
use crate::messages::{ChatDetail, ServerMessage, SessionId};

/// Detail used when an error body is not JSON at all
const UNPARSEABLE_DETAIL: &str = "Unknown error";

/// Default connect timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// REST backend client
#[derive(Clone)]
pub struct HttpTransport {
    /// API root, e.g. `http://localhost:8000`
    base_url: Url,
    /// HTTP client
    http_client: reqwest::Client,
    /// Bearer token source
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTransport {
    /// Create a transport for the backend at `base_url`
    ///
    /// # Errors
    ///
    /// Fails when `base_url` is not an absolute http(s) URL or the client
    /// cannot be built.
    pub fn new(
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, TransportError> {
        Self::with_connect_timeout(base_url, DEFAULT_CONNECT_TIMEOUT, credentials)
    }

    /// Create a transport with an explicit connect timeout
    ///
    /// No overall request timeout is set: replies stream for as long as the
    /// engine allows.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::new`].
    pub fn with_connect_timeout(
        base_url: &str,
        connect_timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, TransportError> {
        let base_url = parse_base_url(base_url)?;
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            base_url,
            http_client,
            credentials,
        })
    }

    /// The API root requests are sent to
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get chat detail endpoint URL
    fn chat_url(&self, session_id: &SessionId) -> Result<Url, TransportError> {
        self.endpoint(&["api", "v1", "chats", session_id.as_str()])
    }

    /// Get message stream endpoint URL
    fn stream_url(&self, session_id: &SessionId) -> Result<Url, TransportError> {
        self.endpoint(&[
            "api",
            "v1",
            "chats",
            session_id.as_str(),
            "messages",
            "stream",
        ])
    }

    /// Append path segments to the base URL, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Attach the bearer token, if any
    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.credentials.bearer_token() {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, TransportError> {
        let url = self.stream_url(&request.session_id)?;
        tracing::debug!(url = %url, chars = request.content.chars().count(), "Opening stream");

        let response = self
            .authorize(self.http_client.post(url))
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let response = check_status(response).await?;

        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| TransportError::Body(e.to_string()))
        });

        Ok(body.boxed())
    }

    async fn fetch_history(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ServerMessage>, TransportError> {
        let url = self.chat_url(session_id)?;
        tracing::debug!(url = %url, "Fetching history");

        let response = self
            .authorize(self.http_client.get(url))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let response = check_status(response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;
        let detail: ChatDetail =
            serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))?;

        Ok(detail.messages)
    }
}

fn parse_base_url(raw: &str) -> Result<Url, TransportError> {
    let url = Url::parse(raw.trim()).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" if !url.cannot_be_a_base() => Ok(url),
        _ => Err(TransportError::InvalidUrl(format!(
            "{raw}: expected an http or https URL"
        ))),
    }
}

/// Turn a non-success response into [`TransportError::Status`]
async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = error_detail(&body);
    tracing::warn!(status = status.as_u16(), detail = %detail, "Backend rejected request");

    Err(TransportError::Status {
        status: status.as_u16(),
        detail,
    })
}

/// Extract the human-readable detail from an error body
///
/// `detail` is either a string or a list of validation entries with a `msg`
/// field; entries are joined with ", ".
pub(crate) fn error_detail(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return UNPARSEABLE_DETAIL.to_string();
    };

    let detail = match value.get("detail") {
        Some(Value::String(detail)) => detail.clone(),
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| entry.get("msg").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    };

    if detail.is_empty() {
        GENERIC_FAILURE_DETAIL.to_string()
    } else {
        detail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::auth::StaticCredentials;

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::new(base, Arc::new(StaticCredentials::anonymous())).unwrap()
    }

    #[test]
    fn test_endpoint_urls() {
        let t = transport("http://localhost:8000");
        let id = SessionId::from(42);
        assert_eq!(
            t.stream_url(&id).unwrap().as_str(),
            "http://localhost:8000/api/v1/chats/42/messages/stream"
        );
        assert_eq!(
            t.chat_url(&id).unwrap().as_str(),
            "http://localhost:8000/api/v1/chats/42"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let t = transport("https://example.com/persona/");
        assert_eq!(
            t.chat_url(&SessionId::from(1)).unwrap().as_str(),
            "https://example.com/persona/api/v1/chats/1"
        );
    }

    #[test]
    fn test_session_id_is_escaped() {
        let t = transport("http://localhost:8000");
        let url = t.chat_url(&SessionId::new("a/b")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/chats/a%2Fb");
    }

    #[test]
    fn test_rejects_non_http_base() {
        let anon = || Arc::new(StaticCredentials::anonymous()) as Arc<dyn CredentialProvider>;
        assert!(matches!(
            HttpTransport::new("not a url", anon()),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpTransport::new("ftp://example.com", anon()),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_error_detail_string() {
        assert_eq!(error_detail(r#"{"detail": "Chat not found"}"#), "Chat not found");
    }

    #[test]
    fn test_error_detail_validation_list() {
        let body = r#"{"detail": [{"loc": ["body", "content"], "msg": "too long"}, {"msg": "bad"}]}"#;
        assert_eq!(error_detail(body), "too long, bad");
    }

    #[test]
    fn test_error_detail_fallbacks() {
        assert_eq!(error_detail("<html>502</html>"), UNPARSEABLE_DETAIL);
        assert_eq!(error_detail(r#"{"error": "nope"}"#), GENERIC_FAILURE_DETAIL);
        assert_eq!(error_detail(r#"{"detail": ""}"#), GENERIC_FAILURE_DETAIL);
    }
}
