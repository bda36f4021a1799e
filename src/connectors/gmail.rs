//! Gmail connector
//!
//! Talks to Google OAuth and the Gmail REST API directly. Full message
//! bodies are fetched in one multipart/mixed batch request per sync page.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::HeaderMap};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::config::GoogleConfig;
use crate::connectors::{
    AccountProfile, ConnectorError, ListParams, MailConnector, MessageListing, OutgoingMessage,
    RawMessage, Registry, TokenGrant,
};
use crate::mail::{compose_rfc2822, encode_raw};

pub const PROVIDER_ID: &str = "google";

/// Scopes requested at consent time
pub const DEFAULT_GMAIL_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

const BATCH_BOUNDARY: &str = "batch_boundary";

/// Bodies of 403 responses that mean the Gmail API is switched off for the project
const API_DISABLED_PATTERNS: &[&str] = &[
    "service_disabled",
    "accessnotconfigured",
    "gmail api has not been used",
];

/// Bodies of 403 responses that are really quota exhaustion
const QUOTA_ERROR_PATTERNS: &[&str] = &[
    "userratelimitexceeded",
    "ratelimitexceeded",
    "quotaexceeded",
    "servicelimit",
    "daily limit",
    "billing limit",
];

/// Gmail `users.messages` resource (format=full), or a listing reference
/// carrying only `id` and `threadId`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    /// Epoch milliseconds, encoded as a string
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<GmailPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailPayload {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<GmailHeader>,
    #[serde(default)]
    pub body: Option<GmailBody>,
    #[serde(default)]
    pub parts: Vec<GmailPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GmailHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GmailBody {
    /// base64url-encoded content
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Google OAuth token response
#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

/// Google userinfo response
#[derive(Debug, Deserialize)]
struct GoogleUserinfo {
    id: Option<String>,
    email: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailListResponse {
    #[serde(default)]
    messages: Vec<GmailMessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessageRef {
    id: String,
    thread_id: Option<String>,
}

/// Gmail connector implementation
pub struct GmailConnector {
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    /// e.g. `https://gmail.googleapis.com/gmail/v1`
    api_base: String,
    batch_url: String,
    http_client: Client,
}

impl GmailConnector {
    pub fn new(config: &GoogleConfig, timeout: Duration) -> Result<Self, ConnectorError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
            scopes: DEFAULT_GMAIL_SCOPES.iter().map(|s| s.to_string()).collect(),
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            userinfo_url: config.userinfo_url.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            batch_url: config.batch_url.clone(),
            http_client,
        })
    }

    fn messages_endpoint(&self) -> String {
        format!("{}/users/me/messages", self.api_base)
    }

    /// Path of one message as addressed inside a batch sub-request.
    fn batch_item_path(&self, message_id: &str) -> String {
        let path = Url::parse(&self.api_base)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_else(|_| "/gmail/v1".to_string());
        format!("{}/users/me/messages/{}?format=full", path, message_id)
    }

    async fn post_token_form(
        &self,
        form: &[(&str, &str)],
    ) -> Result<GoogleTokenResponse, ConnectorError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport("Token request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_token_error(status, body));
        }

        response.json().await.map_err(|e| {
            ConnectorError::MalformedResponse(format!("Failed to parse token response: {}", e))
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T, ConnectorError> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport("Gmail request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, &headers, body));
        }

        response.json().await.map_err(|e| {
            ConnectorError::MalformedResponse(format!("Failed to parse Gmail response: {}", e))
        })
    }
}

/// Map a failed token endpoint response.
fn classify_token_error(status: StatusCode, body: String) -> ConnectorError {
    if body.contains("invalid_grant") {
        return ConnectorError::InvalidGrant(body);
    }
    if status == StatusCode::UNAUTHORIZED {
        return ConnectorError::Unauthorized(body);
    }
    ConnectorError::Http {
        status: status.as_u16(),
        body,
    }
}

/// Map a failed Gmail API response.
fn classify_api_error(status: StatusCode, headers: &HeaderMap, body: String) -> ConnectorError {
    let retry_after = headers
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());

    match status {
        StatusCode::UNAUTHORIZED => {
            ConnectorError::Unauthorized("Invalid or expired access token".to_string())
        }
        StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited {
            retry_after_secs: Some(retry_after.unwrap_or(60)),
        },
        StatusCode::FORBIDDEN => {
            let lower = body.to_lowercase();
            if API_DISABLED_PATTERNS.iter().any(|p| lower.contains(p)) {
                ConnectorError::ApiDisabled(
                    "Gmail API is not enabled for this Google Cloud project".to_string(),
                )
            } else if QUOTA_ERROR_PATTERNS.iter().any(|p| lower.contains(p)) {
                ConnectorError::RateLimited {
                    retry_after_secs: Some(retry_after.unwrap_or(60)),
                }
            } else {
                ConnectorError::Http {
                    status: status.as_u16(),
                    body,
                }
            }
        }
        _ => ConnectorError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

/// Build the multipart/mixed body fetching each id with `format=full`.
fn build_batch_body(item_paths: &[(String, String)]) -> String {
    let mut body = String::new();
    for (id, path) in item_paths {
        body.push_str(&format!("--{}\r\n", BATCH_BOUNDARY));
        body.push_str("Content-Type: application/http\r\n");
        body.push_str(&format!("Content-ID: <{}>\r\n\r\n", id));
        body.push_str(&format!("GET {}\r\n\r\n", path));
    }
    body.push_str(&format!("--{}--", BATCH_BOUNDARY));
    body
}

/// One part of a batch response.
#[derive(Debug)]
struct BatchPart {
    /// Message id recovered from the part's Content-ID or JSON body
    id: Option<String>,
    result: Result<GmailMessage, ConnectorError>,
}

fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

/// Split a batch response body into per-message results.
fn parse_batch_response(content_type: &str, body: &str) -> Result<Vec<BatchPart>, ConnectorError> {
    let boundary = boundary_from_content_type(content_type).ok_or_else(|| {
        ConnectorError::MalformedResponse("Could not find boundary in batch response".to_string())
    })?;

    let mut parts = Vec::new();
    for chunk in body.split(&format!("--{}", boundary)) {
        let trimmed = chunk.trim();
        if trimmed.is_empty() || trimmed == "--" {
            continue;
        }

        let content_id = chunk.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if !name.trim().eq_ignore_ascii_case("content-id") {
                return None;
            }
            let value = value.trim().trim_start_matches('<').trim_end_matches('>');
            Some(value.strip_prefix("response-").unwrap_or(value).to_string())
        });

        let status = chunk
            .lines()
            .find(|line| line.starts_with("HTTP/"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok());

        let json = match (chunk.find('{'), chunk.rfind('}')) {
            (Some(start), Some(end)) if end > start => &chunk[start..=end],
            _ => "",
        };

        let result = match status {
            Some(status) if !status.is_success() => Err(classify_api_error(
                status,
                &HeaderMap::new(),
                json.to_string(),
            )),
            _ => serde_json::from_str::<GmailMessage>(json).map_err(|e| {
                ConnectorError::MalformedResponse(format!("Unparseable batch part: {}", e))
            }),
        };

        let id = match &result {
            Ok(message) => Some(message.id.clone()),
            Err(_) => content_id,
        };
        parts.push(BatchPart { id, result });
    }

    Ok(parts)
}

#[async_trait]
impl MailConnector for GmailConnector {
    fn provider(&self) -> &'static str {
        PROVIDER_ID
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url, ConnectorError> {
        if self.client_id.is_empty() {
            return Err(ConnectorError::Configuration(
                "Google client id is not configured".to_string(),
            ));
        }

        let mut url = Url::parse(&self.auth_url)
            .map_err(|e| ConnectorError::Configuration(format!("Invalid auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("access_type", "offline") // required for a refresh token
            .append_pair("prompt", "consent")
            .append_pair("state", state);

        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ConnectorError> {
        let token = self
            .post_token_form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .await?;

        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ConnectorError> {
        let token = self
            .post_token_form(&[
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await?;

        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }

    async fn account_profile(&self, access_token: &str) -> Result<AccountProfile, ConnectorError> {
        let userinfo: GoogleUserinfo = self.get_json(&self.userinfo_url, access_token, &[]).await?;

        Ok(AccountProfile {
            provider_account_id: userinfo.id.unwrap_or_else(|| userinfo.email.clone()),
            email: userinfo.email,
            name: userinfo.name,
        })
    }

    async fn list_messages(
        &self,
        access_token: &str,
        params: ListParams,
    ) -> Result<MessageListing, ConnectorError> {
        let mut query = vec![("maxResults", params.max_results.to_string())];
        if let Some(page_token) = params.page_token {
            query.push(("pageToken", page_token));
        }

        let listing: GmailListResponse = self
            .get_json(&self.messages_endpoint(), access_token, &query)
            .await?;

        Ok(MessageListing {
            messages: listing
                .messages
                .into_iter()
                .map(|r| {
                    RawMessage::Gmail(GmailMessage {
                        id: r.id,
                        thread_id: r.thread_id,
                        ..Default::default()
                    })
                })
                .collect(),
            next_page_token: listing.next_page_token,
        })
    }

    async fn fetch_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<RawMessage, ConnectorError> {
        let url = format!("{}/{}", self.messages_endpoint(), message_id);
        let message: GmailMessage = self
            .get_json(&url, access_token, &[("format", "full".to_string())])
            .await?;
        Ok(RawMessage::Gmail(message))
    }

    async fn fetch_messages(
        &self,
        access_token: &str,
        listed: &[RawMessage],
        call_timeout: Duration,
    ) -> Result<Vec<Result<RawMessage, ConnectorError>>, ConnectorError> {
        if listed.is_empty() {
            return Ok(Vec::new());
        }

        let items: Vec<(String, String)> = listed
            .iter()
            .map(|m| (m.id().to_string(), self.batch_item_path(m.id())))
            .collect();

        // The whole batch is one HTTP request, so one timeout covers it.
        let round_trip = async {
            let response = self
                .http_client
                .post(&self.batch_url)
                .bearer_auth(access_token)
                .header(
                    "Content-Type",
                    format!("multipart/mixed; boundary={}", BATCH_BOUNDARY),
                )
                .body(build_batch_body(&items))
                .send()
                .await
                .map_err(|e| ConnectorError::from_transport("Batch fetch failed", e))?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await.map_err(|e| {
                ConnectorError::MalformedResponse(format!("Failed to read batch response: {}", e))
            })?;
            Ok::<_, ConnectorError>((status, headers, body))
        };
        let (status, headers, body) = tokio::time::timeout(call_timeout, round_trip)
            .await
            .map_err(|_| ConnectorError::Timeout)??;

        if !status.is_success() {
            return Err(classify_api_error(status, &headers, body));
        }

        let content_type = headers
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let mut by_id: HashMap<String, Result<GmailMessage, ConnectorError>> = HashMap::new();
        for part in parse_batch_response(content_type, &body)? {
            if let Some(id) = part.id {
                by_id.insert(id, part.result);
            } else if let Err(err) = part.result {
                tracing::warn!(error = %err, "Gmail batch part without message id");
            }
        }

        Ok(listed
            .iter()
            .map(|entry| {
                by_id
                    .remove(entry.id())
                    .unwrap_or_else(|| {
                        Err(ConnectorError::MalformedResponse(format!(
                            "Message {} missing from batch response",
                            entry.id()
                        )))
                    })
                    .map(RawMessage::Gmail)
            })
            .collect())
    }

    async fn send_message(
        &self,
        access_token: &str,
        message: &OutgoingMessage,
    ) -> Result<(), ConnectorError> {
        let raw = encode_raw(&compose_rfc2822(message));
        let mut payload = json!({ "raw": raw });
        if let Some(thread_id) = &message.thread_id {
            payload["threadId"] = json!(thread_id);
        }

        let response = self
            .http_client
            .post(format!("{}/send", self.messages_endpoint()))
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport("Send request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, &headers, body));
        }
        Ok(())
    }
}

/// Register the Gmail connector under its provider id.
pub fn register_gmail_connector(registry: &mut Registry, connector: GmailConnector) {
    registry.register(std::sync::Arc::new(connector));
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server_uri: &str) -> GoogleConfig {
        GoogleConfig {
            client_id: Some("test-client-id".to_string()),
            client_secret: Some("test-client-secret".to_string()),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: format!("{}/token", server_uri),
            userinfo_url: format!("{}/oauth2/v2/userinfo", server_uri),
            api_base: format!("{}/gmail/v1", server_uri),
            batch_url: format!("{}/batch/gmail/v1", server_uri),
        }
    }

    fn connector(server: &MockServer) -> GmailConnector {
        GmailConnector::new(&test_config(&server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_build_authorize_url() {
        let connector = GmailConnector::new(
            &test_config("http://localhost"),
            Duration::from_secs(5),
        )
        .unwrap();

        let url = connector
            .authorize_url("http://localhost:8080/auth/google/callback", "state-1")
            .unwrap();
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["client_id"], "test-client-id");
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["prompt"], "consent");
        assert_eq!(pairs["state"], "state-1");
        assert!(pairs["scope"].contains("gmail.send"));
    }

    #[test]
    fn test_authorize_url_requires_client_id() {
        let mut config = test_config("http://localhost");
        config.client_id = None;
        let connector = GmailConnector::new(&config, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            connector.authorize_url("http://x/cb", "s"),
            Err(ConnectorError::Configuration(_))
        ));
    }

    #[test]
    fn test_parse_batch_response_maps_parts_by_id() {
        let body = concat!(
            "--batch_abc\r\n",
            "Content-Type: application/http\r\n",
            "Content-ID: <response-m1>\r\n\r\n",
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: application/json; charset=UTF-8\r\n\r\n",
            "{\"id\":\"m1\",\"threadId\":\"t1\",\"labelIds\":[\"INBOX\"],\"internalDate\":\"1700000000000\"}\r\n",
            "--batch_abc\r\n",
            "Content-Type: application/http\r\n",
            "Content-ID: <response-m2>\r\n\r\n",
            "HTTP/1.1 404 Not Found\r\n",
            "Content-Type: application/json; charset=UTF-8\r\n\r\n",
            "{\"error\":{\"code\":404,\"message\":\"Requested entity was not found.\"}}\r\n",
            "--batch_abc--\r\n",
        );

        let parts = parse_batch_response("multipart/mixed; boundary=batch_abc", body).unwrap();
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].id.as_deref(), Some("m1"));
        let first = parts[0].result.as_ref().unwrap();
        assert_eq!(first.thread_id.as_deref(), Some("t1"));
        assert_eq!(first.internal_date.as_deref(), Some("1700000000000"));

        assert_eq!(parts[1].id.as_deref(), Some("m2"));
        assert!(matches!(
            parts[1].result,
            Err(ConnectorError::Http { status: 404, .. })
        ));
    }

    #[test]
    fn test_parse_batch_response_requires_boundary() {
        assert!(matches!(
            parse_batch_response("multipart/mixed", "--x--"),
            Err(ConnectorError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_boundary_accepts_quoted_value() {
        assert_eq!(
            boundary_from_content_type("multipart/mixed; boundary=\"batch_q\"; charset=utf-8"),
            Some("batch_q".to_string())
        );
    }

    #[tokio::test]
    async fn test_list_messages_returns_refs_and_page_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("maxResults", "20"))
            .and(header("Authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [
                    {"id": "m1", "threadId": "t1"},
                    {"id": "m2", "threadId": "t1"}
                ],
                "nextPageToken": "page-2",
                "resultSizeEstimate": 2
            })))
            .mount(&server)
            .await;

        let listing = connector(&server)
            .list_messages(
                "access-1",
                ListParams {
                    max_results: 20,
                    page_token: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(listing.messages.len(), 2);
        assert_eq!(listing.messages[1].id(), "m2");
        assert_eq!(listing.next_page_token.as_deref(), Some("page-2"));
    }

    #[tokio::test]
    async fn test_list_messages_empty_mailbox() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"resultSizeEstimate": 0})),
            )
            .mount(&server)
            .await;

        let listing = connector(&server)
            .list_messages("t", ListParams::default())
            .await
            .unwrap();
        assert!(listing.messages.is_empty());
    }

    #[tokio::test]
    async fn test_list_messages_maps_401_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = connector(&server)
            .list_messages("expired", ListParams::default())
            .await
            .expect_err("expected unauthorized");
        assert!(matches!(err, ConnectorError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_list_messages_detects_disabled_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                r#"{"error":{"code":403,"status":"PERMISSION_DENIED","details":[{"reason":"SERVICE_DISABLED"}]}}"#,
            ))
            .mount(&server)
            .await;

        let err = connector(&server)
            .list_messages("t", ListParams::default())
            .await
            .expect_err("expected api disabled");
        assert!(matches!(err, ConnectorError::ApiDisabled(_)));
    }

    #[tokio::test]
    async fn test_rate_limits_on_429_and_quota_403() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_string(r#"{"error":{"status":"userRateLimitExceeded"}}"#),
            )
            .mount(&server)
            .await;

        let connector = connector(&server);
        let err = connector
            .list_messages("t", ListParams::default())
            .await
            .expect_err("expected rate limit");
        assert_eq!(
            err,
            ConnectorError::RateLimited {
                retry_after_secs: Some(120)
            }
        );

        let err = connector
            .fetch_message("t", "m1")
            .await
            .expect_err("expected quota rate limit");
        assert_eq!(
            err,
            ConnectorError::RateLimited {
                retry_after_secs: Some(60)
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_messages_times_out_as_one_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batch/gmail/v1"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let listed = vec![RawMessage::Gmail(GmailMessage {
            id: "m1".into(),
            ..Default::default()
        })];
        let err = connector(&server)
            .fetch_messages("t", &listed, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert_eq!(err, ConnectorError::Timeout);
    }

    #[tokio::test]
    async fn test_fetch_messages_uses_single_batch_request() {
        let server = MockServer::start().await;
        let batch_body = concat!(
            "--batch_resp\r\n",
            "Content-Type: application/http\r\n",
            "Content-ID: <response-m1>\r\n\r\n",
            "HTTP/1.1 200 OK\r\n\r\n",
            "{\"id\":\"m1\",\"threadId\":\"t1\",\"snippet\":\"hi\",\"internalDate\":\"1700000000000\"}\r\n",
            "--batch_resp\r\n",
            "Content-Type: application/http\r\n",
            "Content-ID: <response-m2>\r\n\r\n",
            "HTTP/1.1 500 Internal Server Error\r\n\r\n",
            "{\"error\":{\"code\":500}}\r\n",
            "--batch_resp--\r\n",
        );
        Mock::given(method("POST"))
            .and(path("/batch/gmail/v1"))
            .and(body_string_contains("GET /gmail/v1/users/me/messages/m1?format=full"))
            .and(body_string_contains("GET /gmail/v1/users/me/messages/m2?format=full"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "multipart/mixed; boundary=batch_resp")
                    .set_body_string(batch_body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let listed = vec![
            RawMessage::Gmail(GmailMessage {
                id: "m1".into(),
                thread_id: Some("t1".into()),
                ..Default::default()
            }),
            RawMessage::Gmail(GmailMessage {
                id: "m2".into(),
                thread_id: Some("t1".into()),
                ..Default::default()
            }),
            RawMessage::Gmail(GmailMessage {
                id: "m3".into(),
                ..Default::default()
            }),
        ];

        let results = connector(&server)
            .fetch_messages("t", &listed, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        match &results[0] {
            Ok(RawMessage::Gmail(m)) => assert_eq!(m.snippet.as_deref(), Some("hi")),
            other => panic!("unexpected first result: {:?}", other),
        }
        assert!(matches!(
            results[1],
            Err(ConnectorError::Http { status: 500, .. })
        ));
        assert!(matches!(
            results[2],
            Err(ConnectorError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_invalid_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
            ))
            .mount(&server)
            .await;

        let err = connector(&server)
            .refresh_token("revoked")
            .await
            .expect_err("expected invalid grant");
        assert!(matches!(err, ConnectorError::InvalidGrant(_)));
    }

    #[tokio::test]
    async fn test_refresh_token_success_without_rotation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("refresh_token=r-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "expires_in": 3599,
                "token_type": "Bearer",
                "scope": "https://www.googleapis.com/auth/gmail.readonly"
            })))
            .mount(&server)
            .await;

        let grant = connector(&server).refresh_token("r-1").await.unwrap();
        assert_eq!(grant.access_token, "new-access");
        assert_eq!(grant.refresh_token, None);
        assert_eq!(grant.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn test_account_profile_from_userinfo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth2/v2/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "1098765",
                "email": "ada@example.com",
                "name": "Ada"
            })))
            .mount(&server)
            .await;

        let profile = connector(&server).account_profile("t").await.unwrap();
        assert_eq!(profile.provider_account_id, "1098765");
        assert_eq!(profile.email, "ada@example.com");
        assert_eq!(profile.name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_send_message_posts_raw_and_thread_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .and(body_string_contains("\"threadId\":\"t-9\""))
            .and(body_string_contains("\"raw\":"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "sent-1"})))
            .expect(1)
            .mount(&server)
            .await;

        connector(&server)
            .send_message(
                "t",
                &OutgoingMessage {
                    to: "bob@example.com".into(),
                    subject: "Re: hi".into(),
                    body: "<p>ok</p>".into(),
                    thread_id: Some("t-9".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
}
