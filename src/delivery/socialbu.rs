//! SocialBu scheduling API, shared by the twitter and facebook destinations.

use crate::config;
use crate::delivery::{DeliveryChannel, DeliveryError, Receipt};
use crate::model::Destination;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Posts are scheduled this far ahead.
const PUBLISH_DELAY_MINUTES: i64 = 10;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Account {
    pub id: Value,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, rename = "_type")]
    pub alt_kind: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Account {
    fn id_string(&self) -> Option<String> {
        match &self.id {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AccountList {
    Bare(Vec<Account>),
    Wrapped {
        #[serde(default)]
        items: Vec<Account>,
    },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(rename = "authToken")]
    auth_token: Option<String>,
}

/// Account ids whose `type` starts with the platform name (`twitter.profile`)
/// or whose `_type` mentions it.
pub fn filter_accounts(accounts: &[Account], platform: Destination) -> Vec<String> {
    let platform = platform.as_str();
    accounts
        .iter()
        .filter(|a| {
            a.kind.to_lowercase().starts_with(platform) || a.alt_kind.to_lowercase().contains(platform)
        })
        .filter_map(Account::id_string)
        .collect()
}

/// `publish_at` value: UTC, ten minutes after `now`.
pub fn publish_at(now: DateTime<Utc>) -> String {
    (now + ChronoDuration::minutes(PUBLISH_DELAY_MINUTES))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn post_body(account_ids: &[String], content: &str, now: DateTime<Utc>) -> Value {
    let accounts: Vec<Value> = account_ids
        .iter()
        .map(|id| id.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::from(id.as_str())))
        .collect();
    json!({
        "accounts": accounts,
        "publish_at": publish_at(now),
        "content": content,
        "draft": false,
    })
}

pub struct SocialBuClient {
    http: Client,
    base_url: Url,
    email: String,
    password: String,
    token: Mutex<Option<String>>,
    accounts: Mutex<Option<Vec<Account>>>,
}

impl fmt::Debug for SocialBuClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocialBuClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn transport(err: reqwest::Error) -> DeliveryError {
    DeliveryError::Transport(err.to_string())
}

impl SocialBuClient {
    pub fn from_config(cfg: &config::SocialBu) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url).context("invalid SocialBu base URL")?;
        let http = Client::builder()
            .user_agent("summary-relay/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            email: cfg.email.clone(),
            password: cfg.password.clone(),
            token: Mutex::new(None),
            accounts: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DeliveryError> {
        self.base_url
            .join(path)
            .map_err(|e| DeliveryError::Transport(format!("invalid SocialBu URL: {}", e)))
    }

    async fn bearer(&self) -> Result<String, DeliveryError> {
        self.authenticate().await?;
        self.token
            .lock()
            .await
            .clone()
            .ok_or_else(|| DeliveryError::Unauthorized("no SocialBu session".into()))
    }

    /// Log in once; later calls reuse the session token.
    #[instrument(skip_all)]
    pub async fn authenticate(&self) -> Result<(), DeliveryError> {
        let mut token = self.token.lock().await;
        if token.is_some() {
            return Ok(());
        }
        let res = self
            .http
            .post(self.endpoint("auth/get_token")?)
            .json(&json!({"email": self.email, "password": self.password}))
            .send()
            .await
            .map_err(transport)?;
        let status = res.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Transport(format!("SocialBu auth {}: {}", status, body)));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!("SocialBu authentication failed - status: {}, body: {}", status, body);
            return Err(DeliveryError::Unauthorized(format!("status {}", status)));
        }
        let payload: TokenResponse = res.json().await.map_err(transport)?;
        match payload.auth_token.filter(|t| !t.is_empty()) {
            Some(t) => {
                *token = Some(t);
                info!("authenticated with SocialBu");
                Ok(())
            }
            None => Err(DeliveryError::Unauthorized("no auth token in response".into())),
        }
    }

    pub async fn accounts(&self) -> Result<Vec<Account>, DeliveryError> {
        if let Some(cached) = self.accounts.lock().await.clone() {
            return Ok(cached);
        }
        let bearer = self.bearer().await?;
        let res = self
            .http
            .get(self.endpoint("accounts")?)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(transport)?;
        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DeliveryError::Unauthorized(format!("accounts: status {}", status)));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Transport(format!("accounts {}: {}", status, body)));
        }
        let list: AccountList = res.json().await.map_err(transport)?;
        let accounts = match list {
            AccountList::Bare(a) => a,
            AccountList::Wrapped { items } => items,
        };
        debug!(count = accounts.len(), "fetched SocialBu accounts");
        *self.accounts.lock().await = Some(accounts.clone());
        Ok(accounts)
    }

    pub async fn create_post(&self, account_ids: &[String], content: &str) -> Result<Receipt, DeliveryError> {
        let bearer = self.bearer().await?;
        let body = post_body(account_ids, content, Utc::now());
        let res = self
            .http
            .post(self.endpoint("posts")?)
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DeliveryError::Unauthorized(format!("posts: status {}", status)));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(DeliveryError::Transport(format!("posts {}: {}", status, text)));
        }
        if !status.is_success() {
            return Err(DeliveryError::Rejected(format!("posts {}: {}", status, text)));
        }
        let confirmation = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| {
                v.get("id")
                    .or_else(|| v.pointer("/post/id"))
                    .map(|id| id.to_string().trim_matches('"').to_string())
            })
            .unwrap_or_else(|| "accepted".to_string());
        Ok(Receipt::new(confirmation))
    }

    /// End the session; a no-op when not logged in.
    pub async fn logout(&self) {
        let Some(bearer) = self.token.lock().await.take() else {
            return;
        };
        let url = match self.endpoint("auth/logout") {
            Ok(u) => u,
            Err(err) => {
                warn!(?err, "cannot log out of SocialBu");
                return;
            }
        };
        match self.http.post(url).bearer_auth(bearer).send().await {
            Ok(res) if res.status().is_success() => info!("logged out of SocialBu"),
            Ok(res) => warn!(status = %res.status(), "SocialBu logout failed"),
            Err(err) => warn!(?err, "SocialBu logout failed"),
        }
    }
}

/// One SocialBu-backed platform.
pub struct SocialBuChannel {
    client: Arc<SocialBuClient>,
    platform: Destination,
}

impl SocialBuChannel {
    pub fn new(client: Arc<SocialBuClient>, platform: Destination) -> Self {
        Self { client, platform }
    }
}

#[async_trait]
impl DeliveryChannel for SocialBuChannel {
    fn destination(&self) -> Destination {
        self.platform
    }

    async fn prepare(&self) -> Result<(), DeliveryError> {
        self.client.authenticate().await
    }

    async fn targets(&self) -> Result<Vec<String>, DeliveryError> {
        let accounts = self.client.accounts().await?;
        let ids = filter_accounts(&accounts, self.platform);
        info!(platform = %self.platform, count = ids.len(), "resolved SocialBu accounts");
        if ids.is_empty() {
            return Err(DeliveryError::NoTargets);
        }
        Ok(ids)
    }

    async fn send(&self, targets: &[String], content: &str) -> Result<Receipt, DeliveryError> {
        self.client.create_post(targets, content).await
    }

    async fn finish(&self) {
        self.client.logout().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn accounts() -> Vec<Account> {
        serde_json::from_value(json!([
            {"id": 1, "type": "twitter.profile"},
            {"id": 2, "type": "facebook.page"},
            {"id": "3", "type": "other", "_type": "Legacy Facebook Group"},
            {"id": null, "type": "twitter.profile"}
        ]))
        .unwrap()
    }

    #[test]
    fn filters_by_platform() {
        assert_eq!(filter_accounts(&accounts(), Destination::Twitter), vec!["1"]);
        assert_eq!(filter_accounts(&accounts(), Destination::Facebook), vec!["2", "3"]);
    }

    #[test]
    fn wrapped_account_list_parses() {
        let list: AccountList = serde_json::from_value(json!({"items": [{"id": 9, "type": "twitter.x"}]})).unwrap();
        match list {
            AccountList::Wrapped { items } => assert_eq!(items.len(), 1),
            AccountList::Bare(_) => panic!("expected wrapped list"),
        }
    }

    #[test]
    fn post_is_scheduled_ten_minutes_ahead() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 23, 55, 0).unwrap();
        let body = post_body(&["1".into(), "abc".into()], "hello", now);
        assert_eq!(body["publish_at"], "2024-05-02 00:05:00");
        assert_eq!(body["accounts"], json!([1, "abc"]));
        assert_eq!(body["draft"], false);
    }

    #[tokio::test]
    async fn logout_without_session_is_noop() {
        let client = SocialBuClient::from_config(&config::SocialBu {
            base_url: "http://127.0.0.1:9/".into(),
            email: "e".into(),
            password: "p".into(),
        })
        .unwrap();
        client.logout().await;
        assert!(!format!("{:?}", client).contains("\"p\""));
    }
}
