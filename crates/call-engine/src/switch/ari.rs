//! ARI client: REST operations plus the event WebSocket.
//!
//! The switch pushes JSON events over `/ari/events`; operations go over
//! plain REST with basic auth. Event decoding is kept as a pure function
//! so the JSON mapping is testable without a switch.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::{ChannelInfo, SwitchError, SwitchEvent, SwitchOps, SwitchResult};

/// Connection settings for the ARI interface.
#[derive(Debug, Clone)]
pub struct AriConfig {
    /// HTTP base URL, e.g. `http://127.0.0.1:8088`
    pub url: String,
    pub username: String,
    pub password: String,
    /// Stasis application name events are subscribed for
    pub app_name: String,
}

/// REST + WebSocket client for the switch.
pub struct AriClient {
    http: reqwest::Client,
    config: AriConfig,
}

impl AriClient {
    /// Connect the event WebSocket and return the client together with
    /// the decoded event stream.
    ///
    /// Failing to establish the WebSocket is fatal for the process: the
    /// switch would be invoking an application nobody listens to.
    pub async fn connect(
        config: AriConfig,
    ) -> SwitchResult<(Self, mpsc::Receiver<SwitchEvent>)> {
        let ws_url = events_url(&config)?;
        let (ws, _response) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| SwitchError::event_stream(e.to_string()))?;
        info!(app = %config.app_name, "connected to switch event stream");

        let (events_tx, events_rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let (_sink, mut stream) = ws.split();
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str(text.as_ref()) {
                        Ok(value) => {
                            if let Some(event) = decode_event(&value) {
                                if events_tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "undecodable switch event"),
                    },
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "switch event stream failed");
                        return;
                    }
                }
            }
            warn!("switch event stream closed");
        });

        Ok((
            Self {
                http: reqwest::Client::new(),
                config,
            },
            events_rx,
        ))
    }

    fn rest(&self, path: &str) -> String {
        format!("{}/ari{}", self.config.url.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> SwitchResult<reqwest::Response> {
        let response = request
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(SwitchError::rejected(operation, status.as_u16()))
        }
    }

    /// Like [`send`](Self::send) but retried once on transport errors.
    /// Only used for operations that are safe to repeat.
    async fn send_idempotent(
        &self,
        operation: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> SwitchResult<reqwest::Response> {
        match self.send(operation, build()).await {
            Err(SwitchError::Transport(e)) => {
                debug!(operation, error = %e, "retrying idempotent switch call");
                self.send(operation, build()).await
            }
            other => other,
        }
    }

    async fn json_id(response: reqwest::Response, operation: &str) -> SwitchResult<String> {
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SwitchError::malformed(format!("{operation}: {e}")))?;
        value["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SwitchError::malformed(format!("{operation}: missing id")))
    }
}

/// Build the event WebSocket URL from the HTTP base URL.
fn events_url(config: &AriConfig) -> SwitchResult<Url> {
    let mut url = Url::parse(&config.url)
        .map_err(|e| SwitchError::event_stream(format!("invalid ARI url: {e}")))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| SwitchError::event_stream("cannot derive websocket scheme"))?;
    url.set_path("/ari/events");
    url.query_pairs_mut()
        .append_pair("app", &config.app_name)
        .append_pair(
            "api_key",
            &format!("{}:{}", config.username, config.password),
        )
        .append_pair("subscribeAll", "false");
    Ok(url)
}

/// Decode one ARI JSON event into the engine's event set.
///
/// Events the orchestrator has no use for yield `None`.
fn decode_event(value: &serde_json::Value) -> Option<SwitchEvent> {
    let channel_id = || {
        value["channel"]["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_default()
    };

    match value["type"].as_str()? {
        "StasisStart" => {
            let args = value["args"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Some(SwitchEvent::ChannelEnter {
                channel: ChannelInfo {
                    id: channel_id(),
                    caller_number: value["channel"]["caller"]["number"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                },
                args,
            })
        }
        "StasisEnd" => Some(SwitchEvent::ChannelExit {
            channel_id: channel_id(),
        }),
        "ChannelTalkingStarted" => Some(SwitchEvent::VoiceStart {
            channel_id: channel_id(),
        }),
        "ChannelTalkingFinished" => Some(SwitchEvent::VoiceEnd {
            channel_id: channel_id(),
            duration_ms: value["duration"].as_u64(),
        }),
        "ChannelDtmfReceived" => Some(SwitchEvent::DtmfDigit {
            channel_id: channel_id(),
            digit: value["digit"].as_str()?.chars().next()?,
        }),
        "PlaybackFinished" => Some(SwitchEvent::PlaybackFinished {
            playback_id: value["playback"]["id"].as_str()?.to_string(),
        }),
        "PlaybackFailed" => Some(SwitchEvent::PlaybackFailed {
            playback_id: value["playback"]["id"].as_str()?.to_string(),
        }),
        other => {
            debug!(event = other, "ignoring switch event");
            None
        }
    }
}

#[async_trait]
impl SwitchOps for AriClient {
    async fn answer(&self, channel_id: &str) -> SwitchResult<()> {
        let url = self.rest(&format!("/channels/{channel_id}/answer"));
        self.send_idempotent("answer", || self.http.post(&url)).await?;
        Ok(())
    }

    async fn get_variable(&self, channel_id: &str, name: &str) -> SwitchResult<Option<String>> {
        let url = self.rest(&format!("/channels/{channel_id}/variable"));
        let response = self
            .send_idempotent("get_variable", || {
                self.http.get(&url).query(&[("variable", name)])
            })
            .await;
        match response {
            Ok(response) => {
                let value: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| SwitchError::malformed(format!("get_variable: {e}")))?;
                Ok(value["value"].as_str().map(str::to_string))
            }
            // The switch answers 404 for unset variables.
            Err(SwitchError::Rejected { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_all_variables(&self, channel_id: &str) -> SwitchResult<HashMap<String, String>> {
        let url = self.rest(&format!("/channels/{channel_id}"));
        let response = self
            .send_idempotent("get_all_variables", || self.http.get(&url))
            .await?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SwitchError::malformed(format!("get_all_variables: {e}")))?;
        let vars = value["channelvars"]
            .as_object()
            .ok_or_else(|| SwitchError::malformed("channel has no bulk variable map"))?;
        Ok(vars
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect())
    }

    async fn set_variable(&self, channel_id: &str, name: &str, value: &str) -> SwitchResult<()> {
        let url = self.rest(&format!("/channels/{channel_id}/variable"));
        self.send_idempotent("set_variable", || {
            self.http
                .post(&url)
                .query(&[("variable", name), ("value", value)])
        })
        .await?;
        Ok(())
    }

    async fn hangup(&self, channel_id: &str) -> SwitchResult<()> {
        let url = self.rest(&format!("/channels/{channel_id}"));
        self.send_idempotent("hangup", || self.http.delete(&url)).await?;
        Ok(())
    }

    async fn continue_script(&self, channel_id: &str) -> SwitchResult<()> {
        let url = self.rest(&format!("/channels/{channel_id}/continue"));
        self.send("continue_script", self.http.post(&url)).await?;
        Ok(())
    }

    async fn create_mixing_bridge(&self) -> SwitchResult<String> {
        let url = self.rest("/bridges");
        let response = self
            .send(
                "create_mixing_bridge",
                self.http.post(&url).query(&[("type", "mixing")]),
            )
            .await?;
        Self::json_id(response, "create_mixing_bridge").await
    }

    async fn add_to_bridge(&self, bridge_id: &str, channel_id: &str) -> SwitchResult<()> {
        let url = self.rest(&format!("/bridges/{bridge_id}/addChannel"));
        self.send(
            "add_to_bridge",
            self.http.post(&url).query(&[("channel", channel_id)]),
        )
        .await?;
        Ok(())
    }

    async fn destroy_bridge(&self, bridge_id: &str) -> SwitchResult<()> {
        let url = self.rest(&format!("/bridges/{bridge_id}"));
        self.send_idempotent("destroy_bridge", || self.http.delete(&url))
            .await?;
        Ok(())
    }

    async fn snoop_channel(
        &self,
        channel_id: &str,
        spy: &str,
        app_args: &str,
    ) -> SwitchResult<String> {
        let url = self.rest(&format!("/channels/{channel_id}/snoop"));
        let response = self
            .send(
                "snoop_channel",
                self.http.post(&url).query(&[
                    ("spy", spy),
                    ("app", self.config.app_name.as_str()),
                    ("appArgs", app_args),
                ]),
            )
            .await?;
        Self::json_id(response, "snoop_channel").await
    }

    async fn external_media(
        &self,
        host: &str,
        port: u16,
        format: &str,
        app_args: &str,
    ) -> SwitchResult<String> {
        let url = self.rest("/channels/externalMedia");
        let external_host = format!("{host}:{port}");
        let response = self
            .send(
                "external_media",
                self.http.post(&url).query(&[
                    ("app", self.config.app_name.as_str()),
                    ("external_host", external_host.as_str()),
                    ("format", format),
                    ("data", app_args),
                ]),
            )
            .await?;
        Self::json_id(response, "external_media").await
    }

    async fn play_on_bridge(&self, bridge_id: &str, media_uri: &str) -> SwitchResult<String> {
        let url = self.rest(&format!("/bridges/{bridge_id}/play"));
        let response = self
            .send(
                "play_on_bridge",
                self.http.post(&url).query(&[("media", media_uri)]),
            )
            .await?;
        Self::json_id(response, "play_on_bridge").await
    }

    async fn stop_playback(&self, playback_id: &str) -> SwitchResult<()> {
        let url = self.rest(&format!("/playbacks/{playback_id}"));
        self.send_idempotent("stop_playback", || self.http.delete(&url))
            .await?;
        Ok(())
    }
}
