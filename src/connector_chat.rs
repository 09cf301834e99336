//! Slack-style chat connector.
//!
//! Reads messages and thread replies from the Web API:
//!
//! | Method | Use |
//! |--------|-----|
//! | `conversations.list` | Enumerate non-archived channels (cursor-paginated) |
//! | `conversations.history` | Top-level messages inside the window |
//! | `conversations.replies` | Replies of every thread parent with `reply_count > 0` |
//! | `users.info` | Sender display names, cached per run |
//!
//! # Configuration
//!
//! ```toml
//! [chat]
//! token_env = "SLACK_BOT_TOKEN"
//! include_channels = ["eng-releases", "ops"]   # empty = every channel
//! history_limit = 200
//! ```
//!
//! Bot messages, messages with a subtype (joins, edits, broadcasts) and
//! messages without text are skipped. A failure listing channels aborts
//! the source; a failure reading one channel or one thread is logged and
//! that channel or thread is skipped.
//!
//! Unit ids and thread anchors are `<channel id>:<ts>`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use kb_ingest_core::error::IngestError;
use kb_ingest_core::models::RawUnit;

use crate::config::{ChatConfig, ChatCredentials};
use crate::traits::ChatSource;

const SOURCE_NAME: &str = "slack";
/// API error codes that mean the token itself is unusable.
const AUTH_ERRORS: &[&str] = &[
    "not_authed",
    "invalid_auth",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

/// A chat connector instance that implements [`ChatSource`].
pub struct ChatConnector {
    config: ChatConfig,
    token: String,
    client: reqwest::Client,
    user_names: Mutex<HashMap<String, Option<String>>>,
}

#[derive(Debug, Clone)]
struct Channel {
    id: String,
    name: String,
}

impl ChatConnector {
    pub fn new(config: ChatConfig, credentials: ChatCredentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            token: credentials.token,
            client,
            user_names: Mutex::new(HashMap::new()),
        })
    }

    /// Call a Web API method. Non-`ok` replies become errors carrying the
    /// API's error code.
    async fn call_api(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), method);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned HTTP {}: {}", method, status, body);
        }

        let json: Value = response
            .json()
            .await
            .with_context(|| format!("{} returned invalid JSON", method))?;
        if json.get("ok").and_then(Value::as_bool) != Some(true) {
            let code = json
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            if AUTH_ERRORS.contains(&code) {
                return Err(IngestError::Configuration(format!(
                    "chat token rejected by {}: {}",
                    method, code
                ))
                .into());
            }
            anyhow::bail!("{} failed: {}", method, code);
        }
        Ok(json)
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut params = vec![
                ("types", "public_channel,private_channel".to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", "200".to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }
            let json = self.call_api("conversations.list", &params).await?;

            for ch in json
                .get("channels")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if ch.get("is_archived").and_then(Value::as_bool) == Some(true) {
                    continue;
                }
                let (Some(id), Some(name)) = (
                    ch.get("id").and_then(Value::as_str),
                    ch.get("name").and_then(Value::as_str),
                ) else {
                    continue;
                };
                if !self.config.include_channels.is_empty()
                    && !self.config.include_channels.iter().any(|c| c == name)
                {
                    continue;
                }
                channels.push(Channel {
                    id: id.to_string(),
                    name: name.to_string(),
                });
            }

            cursor = next_cursor(&json);
            if cursor.is_empty() {
                break;
            }
        }
        Ok(channels)
    }

    async fn channel_history(
        &self,
        channel: &Channel,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        let mut messages = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut params = vec![
                ("channel", channel.id.clone()),
                ("oldest", format_slack_ts(window_start)),
                ("latest", format_slack_ts(window_end)),
                ("inclusive", "true".to_string()),
                ("limit", self.config.history_limit.to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }
            let json = self.call_api("conversations.history", &params).await?;
            if let Some(batch) = json.get("messages").and_then(Value::as_array) {
                messages.extend(batch.iter().cloned());
            }
            cursor = next_cursor(&json);
            if cursor.is_empty() {
                break;
            }
        }
        Ok(messages)
    }

    async fn thread_replies(&self, channel: &Channel, parent_ts: &str) -> Result<Vec<Value>> {
        let json = self
            .call_api(
                "conversations.replies",
                &[
                    ("channel", channel.id.clone()),
                    ("ts", parent_ts.to_string()),
                    ("limit", self.config.history_limit.to_string()),
                ],
            )
            .await?;
        Ok(json
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Resolve a user id to a display name: `real_name`, then
    /// `profile.display_name`, then `name`. Failures are cached as `None`.
    async fn user_name(&self, user_id: &str) -> Option<String> {
        if let Ok(cache) = self.user_names.lock() {
            if let Some(cached) = cache.get(user_id) {
                return cached.clone();
            }
        }

        let name = match self
            .call_api("users.info", &[("user", user_id.to_string())])
            .await
        {
            Ok(json) => {
                let user = json.get("user");
                [
                    user.and_then(|u| u.get("real_name")),
                    user.and_then(|u| u.get("profile"))
                        .and_then(|p| p.get("display_name")),
                    user.and_then(|u| u.get("name")),
                ]
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .find(|s| !s.trim().is_empty())
                .map(str::to_string)
            }
            Err(e) => {
                debug!(user = user_id, error = %e, "users.info failed");
                None
            }
        };

        if let Ok(mut cache) = self.user_names.lock() {
            cache.insert(user_id.to_string(), name.clone());
        }
        name
    }

    async fn to_raw_unit(
        &self,
        msg: &Value,
        channel: &Channel,
        anchor_ts: Option<&str>,
    ) -> Option<RawUnit> {
        if !is_human_message(msg) {
            return None;
        }
        let sender = match msg.get("user").and_then(Value::as_str) {
            Some(user) => self.user_name(user).await,
            None => None,
        };
        unit_from_message(msg, channel, anchor_ts, sender)
    }

    async fn fetch_channel(
        &self,
        channel: &Channel,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<RawUnit>> {
        let history = self
            .channel_history(channel, window_start, window_end)
            .await?;
        let mut units = Vec::new();

        for msg in &history {
            let Some(parent_ts) = msg.get("ts").and_then(Value::as_str) else {
                continue;
            };
            let Some(unit) = self.to_raw_unit(msg, channel, None).await else {
                continue;
            };
            units.push(unit);

            let reply_count = msg.get("reply_count").and_then(Value::as_u64).unwrap_or(0);
            if reply_count == 0 {
                continue;
            }
            match self.thread_replies(channel, parent_ts).await {
                Ok(replies) => {
                    for reply in &replies {
                        if reply.get("ts").and_then(Value::as_str) == Some(parent_ts) {
                            continue;
                        }
                        if let Some(unit) = self.to_raw_unit(reply, channel, Some(parent_ts)).await
                        {
                            if unit.timestamp <= window_end {
                                units.push(unit);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(channel = %channel.name, thread = %parent_ts, error = %e, "Failed to fetch thread replies");
                }
            }
        }
        Ok(units)
    }
}

#[async_trait]
impl ChatSource for ChatConnector {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<RawUnit>> {
        let channels = self.list_channels().await.map_err(|e| {
            if e.downcast_ref::<IngestError>().is_some() {
                return e;
            }
            anyhow::Error::from(IngestError::AdapterFetch {
                source_name: SOURCE_NAME.to_string(),
                message: format!("{:#}", e),
            })
        })?;
        info!(channels = channels.len(), "Scanning chat channels");

        let mut units = Vec::new();
        for channel in &channels {
            match self.fetch_channel(channel, window_start, window_end).await {
                Ok(batch) => {
                    debug!(channel = %channel.name, messages = batch.len(), "Fetched channel");
                    units.extend(batch);
                }
                Err(e) => {
                    warn!(channel = %channel.name, error = %e, "Skipping channel");
                }
            }
        }
        units.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(units)
    }
}

/// Unit ids are `<channel id>:<ts>` because a `ts` is only unique within
/// one channel.
fn unit_id(channel: &Channel, ts: &str) -> String {
    format!("{}:{}", channel.id, ts)
}

/// Build a raw unit from one history or replies entry. `anchor_ts` is the
/// parent's `ts` when `msg` was fetched as a thread reply.
fn unit_from_message(
    msg: &Value,
    channel: &Channel,
    anchor_ts: Option<&str>,
    sender: Option<String>,
) -> Option<RawUnit> {
    let ts = msg.get("ts").and_then(Value::as_str)?;
    let timestamp = parse_slack_ts(ts)?;
    let thread_anchor_id = anchor_ts
        .or_else(|| msg.get("thread_ts").and_then(Value::as_str))
        .map(|anchor| unit_id(channel, anchor));

    Some(RawUnit {
        source_id: unit_id(channel, ts),
        channel: channel.name.clone(),
        text: msg
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        sender,
        timestamp,
        thread_anchor_id,
        attachments: msg
            .get("files")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    })
}

fn is_human_message(msg: &Value) -> bool {
    msg.get("bot_id").is_none()
        && msg.get("subtype").is_none()
        && msg
            .get("text")
            .and_then(Value::as_str)
            .is_some_and(|t| !t.trim().is_empty())
}

fn next_cursor(json: &Value) -> String {
    json.get("response_metadata")
        .and_then(|m| m.get("next_cursor"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Parse a `"1699999999.000200"` timestamp.
pub fn parse_slack_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = format!("{:0<6}", frac).get(..6)?.parse().ok()?;
    DateTime::from_timestamp(secs, micros * 1000)
}

/// Format a timestamp the way the history API expects it.
pub fn format_slack_ts(dt: DateTime<Utc>) -> String {
    format!("{}.{:06}", dt.timestamp(), dt.timestamp_subsec_micros())
}
