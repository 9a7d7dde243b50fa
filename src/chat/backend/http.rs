//! HTTP implementation of the data backend contract.
//!
//! Row queries go through the hosted backend's REST row API (equality /
//! boolean-OR filters plus `order=` on the query string, `Prefer:
//! return=representation` on writes). Realtime inserts arrive over a
//! WebSocket channel joined on the broad `messages` topic; filtering down to
//! a conversation pair is the consumer's job.

use crate::chat::backend::entities::{ConnectionRow, MessageRow, NewMessage, ProfileRow};
use crate::chat::backend::{DataBackend, InsertSubscription, SubscriptionGuard};
use crate::chat::types::handle_rest_response;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

/// Connection settings for the hosted backend.
#[derive(Clone, Debug)]
pub struct HttpBackendConfig {
    /// REST base address, e.g. `https://xyz.evoapp.dev`.
    pub api_base_url: String,
    /// WebSocket base address for the realtime channel.
    pub realtime_ws_url: String,
    /// Project API key, sent on every request.
    pub anon_key: String,
    /// Access token of the signed-in user; empty when signed out.
    pub access_token: String,
}

/// Backend client over the hosted REST + realtime APIs.
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
}

/// Heartbeat cadence on the realtime socket.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Serialize)]
struct RealtimeFrame<'a> {
    topic: &'a str,
    event: &'a str,
    payload: serde_json::Value,
    #[serde(rename = "ref")]
    frame_ref: String,
}

#[derive(Deserialize)]
struct RealtimeEvent {
    #[serde(default)]
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        // Auth travels on every request via default headers.
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::HeaderName::from_static("apikey"),
            reqwest::header::HeaderValue::from_str(&config.anon_key)
                .context("invalid project API key")?,
        );
        if !config.access_token.is_empty() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!(
                    "Bearer {}",
                    config.access_token
                ))
                .context("invalid access token")?,
            );
        }
        let client = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    fn rest_url(&self, path_and_query: &str) -> String {
        format!("{}/rest/v1/{}", self.config.api_base_url, path_and_query)
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(
        &self,
        path_and_query: &str,
        operation_name: &str,
    ) -> Result<Vec<T>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.rest_url(path_and_query);
        debug!(
            "[HTTP] {} url: {}, operation id: {}",
            operation_name, url, operation_id
        );
        let response = self
            .client
            .get(&url)
            .header("x-operation-id", &operation_id)
            .send()
            .await
            .with_context(|| format!("{operation_name}: request failed"))?;
        handle_rest_response(response, operation_name).await
    }
}

#[async_trait]
impl DataBackend for HttpBackend {
    async fn current_user_id(&self) -> Result<Option<String>> {
        if self.config.access_token.is_empty() {
            return Ok(None);
        }
        let url = format!("{}/auth/v1/user", self.config.api_base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("auth user request failed")?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        #[derive(Deserialize)]
        struct AuthUserBody {
            id: String,
        }
        let body: AuthUserBody = handle_rest_response(response, "current user").await?;
        Ok(Some(body.id))
    }

    async fn messages_involving(&self, user_id: &str) -> Result<Vec<MessageRow>> {
        let query = format!(
            "messages?select=*\
             &or=(and(sender_id.eq.{u},sender_deleted.is.false),\
             and(receiver_id.eq.{u},receiver_deleted.is.false))\
             &order=created_at.desc",
            u = user_id
        );
        self.get_rows(&query, "messages involving user").await
    }

    async fn messages_between(&self, user_id: &str, partner_id: &str) -> Result<Vec<MessageRow>> {
        let query = format!(
            "messages?select=*\
             &or=(and(sender_id.eq.{u},receiver_id.eq.{p},sender_deleted.is.false),\
             and(sender_id.eq.{p},receiver_id.eq.{u},receiver_deleted.is.false))\
             &order=created_at.asc",
            u = user_id,
            p = partner_id
        );
        self.get_rows(&query, "pair history").await
    }

    async fn following_of(&self, user_id: &str) -> Result<Vec<ConnectionRow>> {
        let query = format!("connections?select=*&user_id=eq.{user_id}&status=eq.active");
        self.get_rows(&query, "following").await
    }

    async fn followers_of(&self, user_id: &str) -> Result<Vec<ConnectionRow>> {
        let query = format!("connections?select=*&friend_id=eq.{user_id}&status=eq.active");
        self.get_rows(&query, "followers").await
    }

    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "profiles?select=id,display_name,username,avatar_url&id=in.({})",
            ids.join(",")
        );
        self.get_rows(&query, "profiles batch").await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<MessageRow> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.rest_url("messages");
        info!(
            "[HTTP] inserting message {} -> {}",
            message.sender_id, message.receiver_id
        );
        let response = self
            .client
            .post(&url)
            .header("x-operation-id", &operation_id)
            .header("Prefer", "return=representation")
            .json(&message)
            .send()
            .await
            .context("message insert request failed")?;
        let mut rows: Vec<MessageRow> = handle_rest_response(response, "message insert").await?;
        rows.pop()
            .ok_or_else(|| anyhow::anyhow!("message insert: backend returned no row"))
    }

    async fn hide_sent_messages(&self, sender_id: &str, receiver_id: &str) -> Result<u64> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.rest_url(&format!(
            "messages?sender_id=eq.{sender_id}&receiver_id=eq.{receiver_id}"
        ));
        let response = self
            .client
            .patch(&url)
            .header("x-operation-id", &operation_id)
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "sender_deleted": true }))
            .send()
            .await
            .context("hide sent messages request failed")?;
        let rows: Vec<MessageRow> = handle_rest_response(response, "hide sent messages").await?;
        Ok(rows.len() as u64)
    }

    async fn hide_received_messages(&self, receiver_id: &str, sender_id: &str) -> Result<u64> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.rest_url(&format!(
            "messages?receiver_id=eq.{receiver_id}&sender_id=eq.{sender_id}"
        ));
        let response = self
            .client
            .patch(&url)
            .header("x-operation-id", &operation_id)
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "receiver_deleted": true }))
            .send()
            .await
            .context("hide received messages request failed")?;
        let rows: Vec<MessageRow> =
            handle_rest_response(response, "hide received messages").await?;
        Ok(rows.len() as u64)
    }

    async fn subscribe_message_inserts(&self, user_id: &str) -> Result<InsertSubscription> {
        let url = format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.config.realtime_ws_url, self.config.anon_key
        );
        info!("[HTTP] opening realtime channel (user={})", user_id);
        let (ws_stream, response) = connect_async(&url)
            .await
            .context("realtime connect failed")?;
        debug!("[HTTP] realtime connected, status: {}", response.status());

        let (mut write, mut read) = ws_stream.split();

        // Join the broad messages topic; pair filtering happens client-side.
        let join = RealtimeFrame {
            topic: "realtime:public:messages",
            event: "phx_join",
            payload: serde_json::json!({}),
            frame_ref: "1".to_string(),
        };
        write
            .send(WsMessage::Text(serde_json::to_string(&join)?))
            .await
            .context("realtime topic join failed")?;

        let (tx, rx) = mpsc::channel(64);
        let user = user_id.to_string();
        let task = tokio::spawn(async move {
            let mut heartbeat = interval(HEARTBEAT_INTERVAL);
            let mut heartbeat_ref: u64 = 2;
            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        let frame = RealtimeFrame {
                            topic: "phoenix",
                            event: "heartbeat",
                            payload: serde_json::json!({}),
                            frame_ref: heartbeat_ref.to_string(),
                        };
                        heartbeat_ref += 1;
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(_) => continue,
                        };
                        if write.send(WsMessage::Text(text)).await.is_err() {
                            warn!("[HTTP] realtime heartbeat failed, closing channel");
                            break;
                        }
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(WsMessage::Text(text))) => {
                                let event: RealtimeEvent = match serde_json::from_str(&text) {
                                    Ok(event) => event,
                                    Err(e) => {
                                        debug!("[HTTP] unparseable realtime frame: {e}");
                                        continue;
                                    }
                                };
                                if !event.event.eq_ignore_ascii_case("insert") {
                                    continue;
                                }
                                let Some(record) = event.payload.get("record") else {
                                    continue;
                                };
                                let row: MessageRow = match serde_json::from_value(record.clone()) {
                                    Ok(row) => row,
                                    Err(e) => {
                                        warn!(
                                            "[HTTP] bad insert record on {}: {e}",
                                            event.topic
                                        );
                                        continue;
                                    }
                                };
                                // Broad participant filter; the session narrows
                                // further to its own pair.
                                if row.sender_id != user && row.receiver_id != user {
                                    continue;
                                }
                                if tx.send(row).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Ping(payload))) => {
                                let _ = write.send(WsMessage::Pong(payload)).await;
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                debug!("[HTTP] realtime channel closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("[HTTP] realtime read error: {e}");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(InsertSubscription {
            events: rx,
            guard: SubscriptionGuard::new(task, format!("messages:{user_id}")),
        })
    }
}
