//! Azure streaming speech-to-text over the Speech WebSocket protocol.
//!
//! The protocol multiplexes text frames (headers + JSON body, separated
//! by a blank line) and binary audio frames (a 2-byte big-endian header
//! length, the header block, then raw audio). One session is one turn:
//! audio is streamed until the push stream closes, an empty audio frame
//! marks end-of-stream, and the server answers with `speech.phrase`
//! results followed by `turn.end`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::azure::AzureSpeechConfig;
use crate::error::{Result, SpeechError};
use crate::events::ProviderEvent;
use crate::recognizer::{ProviderSession, RecognizerBackend, AUDIO_CHANNEL_CAPACITY};

/// Streaming recognizer backed by the Azure STT WebSocket API.
pub struct AzureRecognizer {
    config: AzureSpeechConfig,
}

impl AzureRecognizer {
    /// Create a backend; fails when credentials are obviously unusable.
    pub fn new(config: AzureSpeechConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn endpoint(&self) -> String {
        format!(
            "wss://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language={}&format=simple",
            self.config.region, self.config.stt_language
        )
    }
}

#[async_trait]
impl RecognizerBackend for AzureRecognizer {
    async fn open(&self) -> Result<ProviderSession> {
        let request_id = Uuid::new_v4().simple().to_string();
        let mut request = self.endpoint().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "Ocp-Apim-Subscription-Key",
            self.config
                .subscription_key
                .parse()
                .map_err(|_| SpeechError::credentials("subscription key is not a valid header"))?,
        );
        headers.insert(
            "X-ConnectionId",
            request_id
                .parse()
                .map_err(|_| SpeechError::credentials("connection id is not a valid header"))?,
        );

        let (ws, _response) = connect_async(request).await?;
        debug!(%request_id, "recognition session connected");

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);
        let (provider_tx, provider_rx) = mpsc::channel(64);
        tokio::spawn(run_session(ws, audio_rx, provider_tx, request_id));

        Ok(ProviderSession {
            audio_tx,
            events_rx: provider_rx,
        })
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn run_session(
    ws: WsStream,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    provider_tx: mpsc::Sender<ProviderEvent>,
    request_id: String,
) {
    let (mut sink, mut stream) = ws.split();

    let config_body = serde_json::json!({
        "context": {
            "system": { "name": "voxgate", "version": env!("CARGO_PKG_VERSION") },
            "os": { "platform": std::env::consts::OS }
        }
    });
    if sink
        .send(Message::Text(
            text_frame("speech.config", &request_id, "application/json", &config_body.to_string()).into(),
        ))
        .await
        .is_err()
    {
        let _ = provider_tx
            .send(ProviderEvent::Canceled("failed to send speech.config".into()))
            .await;
        return;
    }
    let _ = provider_tx.send(ProviderEvent::SessionStarted).await;

    let mut sent_wav_header = false;
    let mut audio_open = true;

    loop {
        tokio::select! {
            pcm = audio_rx.recv(), if audio_open => match pcm {
                Some(pcm) => {
                    let mut body = Vec::with_capacity(pcm.len() + 44);
                    if !sent_wav_header {
                        // Streaming WAV header; the declared lengths are
                        // ignored by the service.
                        body.extend_from_slice(&voxgate_codec_core::wav::wrap(
                            &[],
                            voxgate_codec_core::wav::TELEPHONY_SPEC,
                        ));
                        sent_wav_header = true;
                    }
                    body.extend_from_slice(&pcm);
                    if sink.send(Message::Binary(audio_frame(&request_id, &body).into())).await.is_err() {
                        let _ = provider_tx
                            .send(ProviderEvent::Canceled("audio send failed".into()))
                            .await;
                        return;
                    }
                }
                None => {
                    // Push stream closed: empty audio frame marks the end.
                    audio_open = false;
                    if sink.send(Message::Binary(audio_frame(&request_id, &[]).into())).await.is_err() {
                        let _ = provider_tx
                            .send(ProviderEvent::Canceled("end-of-audio send failed".into()))
                            .await;
                        return;
                    }
                }
            },

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if handle_server_frame(text.as_ref(), &provider_tx).await {
                        return;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "recognition stream failed");
                    let _ = provider_tx.send(ProviderEvent::Canceled(e.to_string())).await;
                    return;
                }
                None => {
                    let _ = provider_tx
                        .send(ProviderEvent::Canceled("connection closed by provider".into()))
                        .await;
                    return;
                }
            }
        }
    }
}

/// Process one text frame; returns true when the turn (and session) ended.
async fn handle_server_frame(frame: &str, provider_tx: &mpsc::Sender<ProviderEvent>) -> bool {
    let Some((path, body)) = parse_frame(frame) else {
        warn!("unparseable recognition frame");
        return false;
    };

    match path.as_str() {
        "speech.hypothesis" | "speech.fragment" => {
            if let Some(text) = json_field(body, "Text") {
                let _ = provider_tx.send(ProviderEvent::Hypothesis(text)).await;
            }
            false
        }
        "speech.phrase" => {
            let status = json_field(body, "RecognitionStatus").unwrap_or_default();
            if status == "Success" {
                if let Some(text) = json_field(body, "DisplayText") {
                    let _ = provider_tx.send(ProviderEvent::Recognized(text)).await;
                }
            } else {
                debug!(%status, "non-success phrase ignored");
            }
            false
        }
        "turn.end" => {
            let _ = provider_tx.send(ProviderEvent::SessionStopped).await;
            true
        }
        // turn.start, speech.startDetected, speech.endDetected
        _ => false,
    }
}

/// Split a text frame into its `Path` header value and the JSON body.
fn parse_frame(frame: &str) -> Option<(String, &str)> {
    let (headers, body) = frame.split_once("\r\n\r\n")?;
    let path = headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim().eq_ignore_ascii_case("path").then(|| value.trim().to_string())
    })?;
    Some((path, body))
}

fn json_field(body: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get(field)?.as_str().map(|s| s.to_string())
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Assemble a text frame: headers, blank line, body.
fn text_frame(path: &str, request_id: &str, content_type: &str, body: &str) -> String {
    format!(
        "Path: {path}\r\nX-RequestId: {request_id}\r\nX-Timestamp: {}\r\nContent-Type: {content_type}\r\n\r\n{body}",
        timestamp()
    )
}

/// Assemble a binary audio frame: u16 BE header length, headers, body.
fn audio_frame(request_id: &str, body: &[u8]) -> Vec<u8> {
    let headers = format!(
        "Path: audio\r\nX-RequestId: {request_id}\r\nX-Timestamp: {}\r\nContent-Type: audio/x-wav\r\n\r\n",
        timestamp()
    );
    let mut frame = Vec::with_capacity(2 + headers.len() + body.len());
    frame.extend_from_slice(&(headers.len() as u16).to_be_bytes());
    frame.extend_from_slice(headers.as_bytes());
    frame.extend_from_slice(body);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_frame_layout() {
        let frame = text_frame("speech.config", "abc123", "application/json", "{}");
        let (headers, body) = frame.split_once("\r\n\r\n").unwrap();
        assert!(headers.starts_with("Path: speech.config\r\n"));
        assert!(headers.contains("X-RequestId: abc123"));
        assert_eq!(body, "{}");
    }

    #[test]
    fn test_audio_frame_length_prefix() {
        let frame = audio_frame("abc123", &[1, 2, 3]);
        let header_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        let headers = std::str::from_utf8(&frame[2..2 + header_len]).unwrap();
        assert!(headers.starts_with("Path: audio\r\n"));
        assert_eq!(&frame[2 + header_len..], &[1, 2, 3]);
    }

    #[test]
    fn test_parse_frame_extracts_path_and_body() {
        let frame = "X-RequestId: x\r\nPath: speech.phrase\r\n\r\n{\"DisplayText\":\"hola\"}";
        let (path, body) = parse_frame(frame).unwrap();
        assert_eq!(path, "speech.phrase");
        assert_eq!(json_field(body, "DisplayText").unwrap(), "hola");
    }

    #[tokio::test]
    async fn test_phrase_and_turn_end_mapping() {
        let (tx, mut rx) = mpsc::channel(8);

        let phrase =
            "Path: speech.phrase\r\n\r\n{\"RecognitionStatus\":\"Success\",\"DisplayText\":\"buenos días\"}";
        assert!(!handle_server_frame(phrase, &tx).await);
        assert_eq!(
            rx.recv().await.unwrap(),
            ProviderEvent::Recognized("buenos días".into())
        );

        let no_match = "Path: speech.phrase\r\n\r\n{\"RecognitionStatus\":\"NoMatch\"}";
        assert!(!handle_server_frame(no_match, &tx).await);

        let end = "Path: turn.end\r\n\r\n{}";
        assert!(handle_server_frame(end, &tx).await);
        assert_eq!(rx.recv().await.unwrap(), ProviderEvent::SessionStopped);
    }
}
