//! Aurinko connector
//!
//! Aurinko fronts the mailbox behind its own unified email API. Listing
//! entries already carry subject, addresses, date and a body snippet, so a
//! listing entry can stand in for a message whose full fetch failed.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::config::AurinkoConfig;
use crate::connectors::{
    AccountProfile, ConnectorError, ListParams, MailConnector, MessageListing, OutgoingMessage,
    RawMessage, Registry, TokenGrant,
};

pub const PROVIDER_ID: &str = "aurinko";

const DEFAULT_SERVICE_TYPE: &str = "Google";
const DEFAULT_SCOPES: &str = "Mail.ReadWrite Mail.Send Mail.Drafts";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AurinkoMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<AurinkoAddress>,
    #[serde(default)]
    pub to: Vec<AurinkoAddress>,
    /// RFC 3339 timestamp
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub body_snippet: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub is_read: Option<bool>,
    #[serde(default, alias = "sysLabels")]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AurinkoAddress {
    #[serde(alias = "address")]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AurinkoTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AurinkoAccount {
    /// Numeric in practice; accepted as any JSON scalar
    id: Option<serde_json::Value>,
    email: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AurinkoListResponse {
    #[serde(default, alias = "records")]
    messages: Vec<AurinkoMessage>,
    next_page_token: Option<String>,
}

pub struct AurinkoConnector {
    client_id: String,
    client_secret: String,
    api_base: String,
    http_client: Client,
}

impl AurinkoConnector {
    pub fn new(config: &AurinkoConfig, timeout: Duration) -> Result<Self, ConnectorError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", general_purpose::STANDARD.encode(credentials))
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, ConnectorError> {
        let response = request
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport(what, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, body));
        }

        response.json().await.map_err(|e| {
            ConnectorError::MalformedResponse(format!("{}: unparseable response: {}", what, e))
        })
    }
}

fn classify_api_error(status: StatusCode, body: String) -> ConnectorError {
    if body.contains("SERVICE_DISABLED") || body.contains("Gmail API has not been used") {
        return ConnectorError::ApiDisabled(
            "Gmail API is not enabled for the Aurinko application".to_string(),
        );
    }
    match status {
        StatusCode::UNAUTHORIZED => ConnectorError::Unauthorized(body),
        StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited {
            retry_after_secs: None,
        },
        _ => ConnectorError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl MailConnector for AurinkoConnector {
    fn provider(&self) -> &'static str {
        PROVIDER_ID
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url, ConnectorError> {
        if self.client_id.is_empty() {
            return Err(ConnectorError::Configuration(
                "Aurinko client id is not configured".to_string(),
            ));
        }

        let mut url = Url::parse(&format!("{}/auth/authorize", self.api_base))
            .map_err(|e| ConnectorError::Configuration(format!("Invalid Aurinko URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("clientId", &self.client_id)
            .append_pair("serviceType", DEFAULT_SERVICE_TYPE)
            .append_pair("scopes", DEFAULT_SCOPES)
            .append_pair("responseType", "code")
            .append_pair("returnUrl", redirect_uri)
            .append_pair("state", state);

        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<TokenGrant, ConnectorError> {
        let request = self
            .http_client
            .post(format!("{}/auth/token/{}", self.api_base, code))
            .header("Authorization", self.basic_auth_header());

        let token: AurinkoTokenResponse = self.send_json(request, "Code exchange").await?;
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ConnectorError> {
        let request = self
            .http_client
            .post(format!("{}/auth/refresh", self.api_base))
            .header("Authorization", self.basic_auth_header())
            .json(&json!({ "refreshToken": refresh_token }));

        let token: AurinkoTokenResponse = match self.send_json(request, "Token refresh").await {
            Ok(token) => token,
            // The refresh endpoint answers a revoked refresh token with 400/401
            Err(ConnectorError::Unauthorized(body))
            | Err(ConnectorError::Http { status: 400, body }) => {
                return Err(ConnectorError::InvalidGrant(body));
            }
            Err(other) => return Err(other),
        };

        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }

    async fn account_profile(&self, access_token: &str) -> Result<AccountProfile, ConnectorError> {
        let request = self
            .http_client
            .get(format!("{}/account", self.api_base))
            .bearer_auth(access_token);

        let account: AurinkoAccount = self.send_json(request, "Account lookup").await?;
        let provider_account_id = match account.id {
            Some(serde_json::Value::String(id)) => id,
            Some(serde_json::Value::Number(id)) => id.to_string(),
            _ => account.email.clone(),
        };

        Ok(AccountProfile {
            provider_account_id,
            email: account.email,
            name: account.name,
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

        let request = self
            .http_client
            .get(format!("{}/email/messages", self.api_base))
            .bearer_auth(access_token)
            .query(&query);

        let listing: AurinkoListResponse = self.send_json(request, "Message listing").await?;
        Ok(MessageListing {
            messages: listing
                .messages
                .into_iter()
                .map(RawMessage::Aurinko)
                .collect(),
            next_page_token: listing.next_page_token,
        })
    }

    async fn fetch_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<RawMessage, ConnectorError> {
        let request = self
            .http_client
            .get(format!("{}/email/messages/{}", self.api_base, message_id))
            .bearer_auth(access_token);

        let message: AurinkoMessage = self.send_json(request, "Message fetch").await?;
        Ok(RawMessage::Aurinko(message))
    }

    async fn send_message(
        &self,
        access_token: &str,
        message: &OutgoingMessage,
    ) -> Result<(), ConnectorError> {
        let to: Vec<_> = message
            .to
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(|addr| json!({ "address": addr }))
            .collect();

        let mut payload = json!({
            "subject": message.subject,
            "body": message.body,
            "bodyType": "html",
            "to": to,
        });
        if let Some(in_reply_to) = &message.in_reply_to {
            payload["inReplyTo"] = json!(in_reply_to);
        }

        let request = self
            .http_client
            .post(format!("{}/email/messages", self.api_base))
            .bearer_auth(access_token)
            .json(&payload);

        let _: serde_json::Value = self.send_json(request, "Send message").await?;
        Ok(())
    }
}

/// Register the Aurinko connector under its provider id.
pub fn register_aurinko_connector(registry: &mut Registry, connector: AurinkoConnector) {
    registry.register(std::sync::Arc::new(connector));
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connector(server: &MockServer) -> AurinkoConnector {
        AurinkoConnector::new(
            &AurinkoConfig {
                client_id: Some("cid".to_string()),
                client_secret: Some("secret".to_string()),
                api_base: server.uri(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_message_accepts_address_alias() {
        let message: AurinkoMessage = serde_json::from_value(serde_json::json!({
            "id": "a1",
            "threadId": "t1",
            "subject": "Hi",
            "from": {"address": "ann@example.com", "name": "Ann"},
            "to": [{"email": "bob@example.com"}],
            "date": "2025-01-02T03:04:05Z",
            "isRead": false
        }))
        .unwrap();

        assert_eq!(message.from.unwrap().email, "ann@example.com");
        assert_eq!(message.to[0].email, "bob@example.com");
        assert_eq!(message.is_read, Some(false));
        assert!(message.labels.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_code_uses_basic_auth() {
        let server = MockServer::start().await;
        let expected = format!("Basic {}", general_purpose::STANDARD.encode("cid:secret"));
        Mock::given(method("POST"))
            .and(path("/auth/token/code-1"))
            .and(header("Authorization", expected.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accountId": 42,
                "accessToken": "acc",
                "refreshToken": "ref",
                "expiresIn": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = connector(&server)
            .exchange_code("code-1", "http://localhost/cb")
            .await
            .unwrap();
        assert_eq!(grant.access_token, "acc");
        assert_eq!(grant.refresh_token.as_deref(), Some("ref"));
        assert_eq!(grant.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_invalid_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({"refreshToken": "stale"})))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .mount(&server)
            .await;

        let err = connector(&server)
            .refresh_token("stale")
            .await
            .expect_err("expected rejection");
        assert!(matches!(err, ConnectorError::InvalidGrant(_)));
    }

    #[tokio::test]
    async fn test_list_messages_returns_full_summaries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/email/messages"))
            .and(query_param("maxResults", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{
                    "id": "a1",
                    "threadId": "t1",
                    "subject": "Lunch",
                    "from": {"email": "ann@example.com"},
                    "to": [],
                    "date": "2025-01-02T03:04:05Z",
                    "bodySnippet": "See you at noon",
                    "isRead": true
                }],
                "nextPageToken": "n2"
            })))
            .mount(&server)
            .await;

        let listing = connector(&server)
            .list_messages(
                "tok",
                ListParams {
                    max_results: 50,
                    page_token: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(listing.next_page_token.as_deref(), Some("n2"));
        match &listing.messages[0] {
            RawMessage::Aurinko(m) => {
                assert_eq!(m.subject.as_deref(), Some("Lunch"));
                assert_eq!(m.body_snippet.as_deref(), Some("See you at noon"));
            }
            other => panic!("unexpected listing entry: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_service_disabled_is_api_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/email/messages"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "Gmail API has not been used in project 123 before or it is disabled (SERVICE_DISABLED)",
            ))
            .mount(&server)
            .await;

        let err = connector(&server)
            .list_messages("tok", ListParams::default())
            .await
            .expect_err("expected disabled api");
        assert!(matches!(err, ConnectorError::ApiDisabled(_)));
    }

    #[tokio::test]
    async fn test_account_profile_numeric_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 777,
                "email": "ann@example.com",
                "name": "Ann"
            })))
            .mount(&server)
            .await;

        let profile = connector(&server).account_profile("tok").await.unwrap();
        assert_eq!(profile.provider_account_id, "777");
        assert_eq!(profile.email, "ann@example.com");
    }

    #[test]
    fn test_authorize_url_parameters() {
        let connector = AurinkoConnector::new(
            &AurinkoConfig {
                client_id: Some("cid".to_string()),
                client_secret: None,
                api_base: "https://api.aurinko.io/v1".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap();

        let url = connector
            .authorize_url("http://localhost:8080/auth/aurinko/callback", "s1")
            .unwrap();
        assert!(url.as_str().starts_with("https://api.aurinko.io/v1/auth/authorize?"));
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["clientId"], "cid");
        assert_eq!(pairs["serviceType"], "Google");
        assert_eq!(pairs["responseType"], "code");
        assert_eq!(pairs["state"], "s1");
    }
}
