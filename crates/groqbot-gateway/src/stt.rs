//! Speech-to-Text via Groq's Whisper endpoint.

use async_trait::async_trait;
use tracing::info;

use crate::error::UpstreamError;
use crate::llm::{classify_failure, GroqClient};

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, UpstreamError>;
}

#[async_trait]
impl Transcriber for GroqClient {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, UpstreamError> {
        info!("STT: transcribing {} bytes", audio.len());

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("voice.ogg")
            .mime_str("audio/ogg")
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.transcription_model.clone())
            .text("response_format", "text");
        if let Some(lang) = &self.transcription_language {
            form = form.text("language", lang.clone());
        }
        let form = form.part("file", part);

        let resp = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), body));
        }

        let text = resp.text().await?.trim().to_string();
        if text.is_empty() {
            return Err(UpstreamError::EmptyResponse);
        }
        let preview: String = text.chars().take(80).collect();
        info!("STT: transcribed: \"{preview}\"");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groqbot_types::config::BotConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str, language: Option<&str>) -> GroqClient {
        let mut config = BotConfig::default().groq;
        config.base_url = base_url.to_string();
        config.transcription_language = language.map(str::to_string);
        GroqClient::new(&config, "k".to_string()).unwrap()
    }

    #[tokio::test]
    async fn transcription_text_is_trimmed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  what is the weather today \n"))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server.uri(), Some("en"))
            .transcribe(b"OggS fake audio")
            .await
            .unwrap();
        assert_eq!(text, "what is the weather today");

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("whisper-large-v3"));
        assert!(body.contains("name=\"language\""));
        assert!(body.contains("voice.ogg"));
    }

    #[tokio::test]
    async fn language_is_omitted_when_unset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hola"))
            .mount(&server)
            .await;

        client(&server.uri(), None).transcribe(b"x").await.unwrap();
        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(!body.contains("name=\"language\""));
    }

    #[tokio::test]
    async fn server_error_is_retryable_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server.uri(), None).transcribe(b"x").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Http { status: 502, .. }));
        assert!(err.is_retryable());
    }
}
