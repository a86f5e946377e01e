use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{AudioSink, ProviderSession, SpeechProvider, SttSessionOptions};
use crate::config::SttConfig;
use crate::error::VoiceError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

/// Live transcription over the Deepgram-style websocket API.
#[derive(Clone)]
pub struct DeepgramProvider {
    url: String,
    api_key: String,
}

impl std::fmt::Debug for DeepgramProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepgramProvider")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl DeepgramProvider {
    pub fn new(config: &SttConfig) -> Self {
        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn session_url(&self, options: &SttSessionOptions) -> Result<String, VoiceError> {
        let url = reqwest::Url::parse_with_params(&self.url, options.query_pairs())
            .map_err(|e| VoiceError::Config(format!("invalid stt.url: {}", e)))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl SpeechProvider for DeepgramProvider {
    async fn connect(&self, options: &SttSessionOptions) -> Result<ProviderSession, VoiceError> {
        let mut request = self
            .session_url(options)?
            .into_client_request()
            .map_err(|e| VoiceError::Config(format!("invalid stt request: {}", e)))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|_| VoiceError::Config("stt.api_key contains invalid characters".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (ws, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        tracing::debug!(status = response.status().as_u16(), "stt websocket connected");

        let (write, read) = ws.split();
        let messages = futures_util::stream::unfold(read, |mut read| async move {
            loop {
                match read.next().await? {
                    Ok(Message::Text(text)) => return Some((Ok(text.to_string()), read)),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "stt provider closed the session");
                        return None;
                    }
                    Ok(_) => continue,
                    Err(e) => return Some((Err(VoiceError::Transport(e.to_string())), read)),
                }
            }
        })
        .boxed();

        Ok(ProviderSession {
            sink: Box::new(DeepgramSink { write }),
            messages,
        })
    }
}

struct DeepgramSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl AudioSink for DeepgramSink {
    async fn send(&mut self, audio: Vec<u8>) -> Result<(), VoiceError> {
        self.write
            .send(Message::Binary(audio.into()))
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        self.write
            .send(Message::Text(CLOSE_STREAM.into()))
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }
}
