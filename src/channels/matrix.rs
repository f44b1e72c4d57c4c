//! Matrix chat bridge using the Client-Server API
//!
//! Long-polling `/sync` for inbound room events, a dedicated sender task
//! draining the outbound reply queue. Inbound filtering happens here before
//! anything is enqueued: configured room only, never the bot's own messages,
//! allow-listed senders only, nothing that predates this process.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ChatReply;
use crate::config::MatrixConfig;
use crate::message::{AudioClip, Envelope};
use crate::worker::QueueHandle;
use crate::{Error, Result};

/// Whisper API upload limit; larger voice notes are rejected in-room
const MAX_AUDIO_BYTES: u64 = 25 * 1024 * 1024;

/// Matrix sync response
#[derive(Debug, Deserialize)]
struct SyncResponse {
    next_batch: String,
    rooms: Option<RoomsResponse>,
}

/// Rooms in sync response
#[derive(Debug, Deserialize)]
struct RoomsResponse {
    join: Option<HashMap<String, JoinedRoom>>,
}

/// A joined room in sync response
#[derive(Debug, Deserialize)]
struct JoinedRoom {
    timeline: Option<Timeline>,
}

/// Timeline events in a room
#[derive(Debug, Deserialize)]
struct Timeline {
    events: Vec<RoomEvent>,
}

/// A room event
#[derive(Debug, Deserialize)]
struct RoomEvent {
    #[serde(rename = "type")]
    event_type: String,
    sender: String,
    origin_server_ts: Option<i64>,
    content: EventContent,
    #[serde(default)]
    unsigned: UnsignedData,
}

/// Event content
#[derive(Debug, Deserialize)]
struct EventContent {
    body: Option<String>,
    msgtype: Option<String>,
    /// Media URL (mxc://...)
    url: Option<String>,
    /// Media info (size, mimetype)
    info: Option<MediaInfo>,
}

/// Media info for Matrix media messages
#[derive(Debug, Deserialize)]
struct MediaInfo {
    size: Option<u64>,
}

/// Unsigned data (`transaction_id` marks our own echoes)
#[derive(Debug, Default, Deserialize)]
struct UnsignedData {
    #[serde(default)]
    transaction_id: Option<String>,
}

/// Message send request
#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    msgtype: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    formatted_body: Option<String>,
}

/// Whoami response
#[derive(Debug, Deserialize)]
struct WhoamiResponse {
    user_id: String,
}

/// Matrix bridge
pub struct MatrixBridge {
    homeserver_url: String,
    access_token: String,
    user_id: String,
    room_id: String,
    allowed_users: Vec<String>,
    start_timestamp_ms: i64,
    client: reqwest::Client,
    queue: QueueHandle,
    stop: CancellationToken,
    sync_token: Option<String>,
}

impl MatrixBridge {
    /// Create a bridge from validated configuration
    ///
    /// Events older than the moment of construction are ignored.
    #[must_use]
    pub fn new(config: &MatrixConfig, queue: QueueHandle, stop: CancellationToken) -> Self {
        Self {
            homeserver_url: config.homeserver.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone().unwrap_or_default(),
            user_id: config.user_id.clone(),
            room_id: config.room_id.clone(),
            allowed_users: config.allowed_users.clone(),
            start_timestamp_ms: chrono::Utc::now().timestamp_millis(),
            client: reqwest::Client::new(),
            queue,
            stop,
            sync_token: None,
        }
    }

    /// Build API endpoint URL
    fn api_url(&self, path: &str) -> String {
        format!("{}/_matrix/client/v3{}", self.homeserver_url, path)
    }

    /// Verify credentials and mark the backlog start point
    async fn connect(&mut self) -> Result<()> {
        let response = self
            .client
            .get(self.api_url("/account/whoami"))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Matrix request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "Matrix auth failed: {status} - {body}"
            )));
        }

        let whoami: WhoamiResponse = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Matrix parse error: {e}")))?;

        tracing::info!(
            user_id = %whoami.user_id,
            homeserver = %self.homeserver_url,
            room = %self.room_id,
            "Matrix authenticated"
        );

        // Initial sync with an empty timeline filter to skip history
        let url = format!(
            "{}?filter={{\"room\":{{\"timeline\":{{\"limit\":0}}}}}}&timeout=0",
            self.api_url("/sync")
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Matrix sync request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "Matrix initial sync failed: {status} - {body}"
            )));
        }

        let sync: SyncResponse = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Matrix sync parse error: {e}")))?;

        self.sync_token = Some(sync.next_batch);
        tracing::debug!("Matrix initial sync complete");

        Ok(())
    }

    /// Run the bridge: inbound sync loop plus the outbound sender task
    ///
    /// # Errors
    ///
    /// Returns error if authentication or the initial sync fails; sync
    /// errors afterwards are retried, not surfaced.
    pub async fn run(mut self, outbox: mpsc::UnboundedReceiver<ChatReply>) -> Result<()> {
        self.connect().await?;

        let sender = OutboundSender {
            homeserver_url: self.homeserver_url.clone(),
            access_token: self.access_token.clone(),
            client: self.client.clone(),
            stop: self.stop.clone(),
        };
        let sender_task = tokio::spawn(sender.run(outbox));

        self.sync_loop().await;

        sender_task.abort();
        tracing::info!("Matrix bridge stopped");
        Ok(())
    }

    /// Long-poll `/sync` until stopped
    async fn sync_loop(&mut self) {
        while !self.stop.is_cancelled() {
            let mut url = format!("{}?timeout=30000", self.api_url("/sync"));
            if let Some(token) = &self.sync_token {
                use std::fmt::Write;
                let _ = write!(url, "&since={token}");
            }

            let request = self
                .client
                .get(&url)
                .bearer_auth(&self.access_token)
                .timeout(Duration::from_secs(60))
                .send();

            let response = tokio::select! {
                response = request => response,
                () = self.stop.cancelled() => break,
            };

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "Matrix sync request failed, retrying");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            if !response.status().is_success() {
                tracing::warn!(status = %response.status(), "Matrix sync error, retrying");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }

            let sync: SyncResponse = match response.json().await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "Matrix sync parse error, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            self.sync_token = Some(sync.next_batch);

            let Some(joined) = sync.rooms.and_then(|r| r.join) else {
                continue;
            };

            for (room_id, room) in joined {
                let Some(timeline) = room.timeline else {
                    continue;
                };
                for event in timeline.events {
                    self.handle_event(&room_id, event).await;
                }
            }
        }
    }

    /// Filter one room event and enqueue it as an envelope
    async fn handle_event(&self, room_id: &str, event: RoomEvent) {
        if event.event_type != "m.room.message" {
            return;
        }
        if room_id != self.room_id {
            tracing::debug!(room = %room_id, "ignoring message from other room");
            return;
        }
        if event.sender == self.user_id {
            return;
        }
        if event.unsigned.transaction_id.is_some() {
            return;
        }
        if let Some(ts) = event.origin_server_ts {
            if ts < self.start_timestamp_ms {
                tracing::debug!(ts, "ignoring message predating this session");
                return;
            }
        }
        if !self.allowed_users.iter().any(|u| u == &event.sender) {
            tracing::debug!(sender = %event.sender, "ignoring non-whitelisted sender");
            return;
        }

        match event.content.msgtype.as_deref() {
            Some("m.text") => {
                let text = event.content.body.unwrap_or_default();
                tracing::info!(sender = %event.sender, text = %text, "chat message");
                self.queue.enqueue(Envelope::chat_text(
                    text,
                    room_id.to_string(),
                    event.sender,
                ));
            }
            Some("m.audio") => {
                self.handle_audio_event(room_id, event).await;
            }
            _ => {}
        }
    }

    /// Download a voice note and enqueue it for transcription
    async fn handle_audio_event(&self, room_id: &str, event: RoomEvent) {
        let size = event.content.info.as_ref().and_then(|i| i.size).unwrap_or(0);
        if size > MAX_AUDIO_BYTES {
            tracing::warn!(sender = %event.sender, size, "voice note too large, rejecting");
            self.send_text(room_id, "Audio-Datei ist zu gross (max. 25 MB).")
                .await;
            return;
        }

        let Some(mxc_url) = event.content.url.as_deref() else {
            return;
        };
        let Some(download_url) = convert_mxc_to_https(mxc_url, &self.homeserver_url) else {
            tracing::warn!(url = %mxc_url, "unparseable media url");
            return;
        };

        let data = match self.download(&download_url).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, "voice note download failed");
                self.send_text(room_id, "Fehler beim Herunterladen der Audio-Datei.")
                    .await;
                return;
            }
        };

        let filename = event
            .content
            .body
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "audio.ogg".to_string());

        tracing::info!(
            sender = %event.sender,
            bytes = data.len(),
            filename = %filename,
            "voice note received"
        );

        self.queue.enqueue(Envelope::chat_audio(
            AudioClip::file(data, filename),
            room_id.to_string(),
            event.sender,
        ));
    }

    /// Download media bytes
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("media download failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Channel(format!(
                "media download failed: {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Channel(format!("media download failed: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Send a plain text message to a room (bridge-level notices)
    async fn send_text(&self, room_id: &str, text: &str) {
        send_message(
            &self.client,
            &self.homeserver_url,
            &self.access_token,
            room_id,
            text,
        )
        .await;
    }
}

/// Drains the outbound reply queue into Matrix sends
struct OutboundSender {
    homeserver_url: String,
    access_token: String,
    client: reqwest::Client,
    stop: CancellationToken,
}

impl OutboundSender {
    async fn run(self, mut outbox: mpsc::UnboundedReceiver<ChatReply>) {
        loop {
            let reply = tokio::select! {
                reply = outbox.recv() => reply,
                () = self.stop.cancelled() => break,
            };

            let Some(reply) = reply else { break };

            send_message(
                &self.client,
                &self.homeserver_url,
                &self.access_token,
                &reply.room_id,
                &reply.text,
            )
            .await;
        }
    }
}

/// Send one `m.text` message, with HTML formatting for code blocks
async fn send_message(
    client: &reqwest::Client,
    homeserver_url: &str,
    access_token: &str,
    room_id: &str,
    text: &str,
) {
    let txn_id = format!("jarvis_{}", uuid::Uuid::new_v4());
    let url = format!(
        "{}/_matrix/client/v3/rooms/{}/send/m.room.message/{}",
        homeserver_url,
        urlencoding::encode(room_id),
        txn_id
    );

    let (format, formatted_body) = if text.contains("```") {
        (Some("org.matrix.custom.html"), Some(convert_to_html(text)))
    } else {
        (None, None)
    };

    let request = MessageRequest {
        msgtype: "m.text",
        body: text,
        format,
        formatted_body,
    };

    let result = client
        .put(&url)
        .bearer_auth(access_token)
        .json(&request)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            tracing::debug!(room = %room_id, "Matrix message sent");
        }
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Matrix send failed");
        }
        Err(e) => {
            tracing::error!(error = %e, "Matrix send failed");
        }
    }
}

/// Convert a Matrix `mxc://` URL to an HTTPS download URL
///
/// `mxc://server/media_id` -> `https://homeserver/_matrix/media/v3/download/server/media_id`
fn convert_mxc_to_https(mxc_url: &str, homeserver_url: &str) -> Option<String> {
    if !mxc_url.starts_with("mxc://") {
        return None;
    }

    let path = mxc_url.strip_prefix("mxc://")?;
    let homeserver = homeserver_url.trim_end_matches('/');

    Some(format!("{homeserver}/_matrix/media/v3/download/{path}"))
}

/// Convert markdown content to HTML for Matrix `formatted_body`
fn convert_to_html(content: &str) -> String {
    use std::fmt::Write;

    let mut html = String::new();
    let mut in_code_block = false;
    let mut code_lang = String::new();
    let mut code_content = String::new();

    for line in content.lines() {
        if line.starts_with("```") {
            if in_code_block {
                let escaped_code = html_escape(&code_content);
                if code_lang.is_empty() {
                    let _ = write!(html, "<pre><code>{}</code></pre>", escaped_code.trim());
                } else {
                    let _ = write!(
                        html,
                        "<pre><code class=\"language-{}\">{}</code></pre>",
                        html_escape(&code_lang),
                        escaped_code.trim()
                    );
                }
                code_content.clear();
                code_lang.clear();
                in_code_block = false;
            } else {
                code_lang = line.trim_start_matches('`').to_string();
                in_code_block = true;
            }
        } else if in_code_block {
            if !code_content.is_empty() {
                code_content.push('\n');
            }
            code_content.push_str(line);
        } else {
            if !html.is_empty() && !html.ends_with("</pre>") {
                html.push_str("<br>");
            }
            html.push_str(&html_escape(line));
        }
    }

    html
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
