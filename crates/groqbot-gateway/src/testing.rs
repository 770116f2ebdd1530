//! In-process fakes for the gateway's collaborators.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::assembler::Prompt;
use crate::channels::{ChatPlatform, TextFormat};
use crate::error::UpstreamError;
use crate::llm::Inference;
use crate::stt::Transcriber;

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub chat_id: i64,
    pub text: String,
    pub format: TextFormat,
    pub reply_to: Option<i64>,
}

#[derive(Default)]
pub struct FakePlatform {
    pub sent: Mutex<Vec<Sent>>,
    pub edits: Mutex<Vec<(i64, i64, String)>>,
    pub admins: Mutex<HashSet<(i64, i64)>>,
    pub admin_lookup_fails: Mutex<bool>,
    pub downloads: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakePlatform {
    pub fn with_admin(chat_id: i64, user_id: i64) -> Self {
        let platform = Self::default();
        platform.admins.lock().unwrap().insert((chat_id, user_id));
        platform
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|s| s.text.clone()).collect()
    }

    pub fn last_text(&self) -> String {
        self.texts().pop().unwrap_or_default()
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        reply_to: Option<i64>,
    ) -> Result<i64> {
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            text: text.to_string(),
            format,
            reply_to,
        });
        Ok(1000 + self.next_id.fetch_add(1, Ordering::SeqCst) as i64)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        self.edits
            .lock()
            .unwrap()
            .push((chat_id, message_id, text.to_string()));
        Ok(())
    }

    async fn is_admin(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        if *self.admin_lookup_fails.lock().unwrap() {
            anyhow::bail!("getChatAdministrators failed");
        }
        Ok(self.admins.lock().unwrap().contains(&(chat_id, user_id)))
    }

    async fn download_file(&self, _file_id: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(b"OggS".to_vec())
    }

    async fn send_typing(&self, _chat_id: i64) {}
}

/// Replays scripted results in order, then answers "ok". A `delay` is slept
/// before every answer.
#[derive(Default)]
pub struct FakeInference {
    pub script: Mutex<VecDeque<Result<String, UpstreamError>>>,
    pub prompts: Mutex<Vec<Prompt>>,
    pub delay: Option<Duration>,
}

impl FakeInference {
    pub fn replying(results: Vec<Result<String, UpstreamError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl Inference for FakeInference {
    async fn complete(&self, prompt: &Prompt) -> Result<String, UpstreamError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }
}

pub struct FakeTranscriber {
    pub text: String,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}
