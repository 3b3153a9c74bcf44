use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatMessage, GenerationSettings};
use crate::scanner::{THINK_END, THINK_START};
use crate::source::{SourceError, TokenSource};

// Fragments buffered between the HTTP task and the session loop
const FRAGMENT_BUFFER: usize = 64;

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    seed: u64,
}

/// One NDJSON line of a streaming `/api/chat` response.
#[derive(Deserialize, Debug, Default)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    /// Reasoning, when the server splits it out of `content`.
    #[serde(default)]
    thinking: String,
}

/// Folds the separate `thinking` field back into the text stream, wrapped in
/// think delimiters, so reasoning reaches the scanner either way.
#[derive(Debug, Default)]
struct ChunkText {
    in_thinking: bool,
}

impl ChunkText {
    fn text(&mut self, message: &ChunkMessage) -> String {
        let mut text = String::new();
        if !message.thinking.is_empty() {
            if !self.in_thinking {
                text.push_str(THINK_START);
                self.in_thinking = true;
            }
            text.push_str(&message.thinking);
        }
        if !message.content.is_empty() {
            if self.in_thinking {
                text.push_str(THINK_END);
                self.in_thinking = false;
            }
            text.push_str(&message.content);
        }
        text
    }
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to list models: {}", response.status()));
        }

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }

    /// `name` without a tag matches the `:latest` tag, the way `ollama run` resolves it.
    pub async fn has_model(&self, name: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| model_matches(m, name)))
    }

    /// Start a streaming chat completion. The request runs on its own task;
    /// fragments are pulled through the returned source.
    pub fn stream_chat(&self, settings: &GenerationSettings, messages: &[ChatMessage]) -> OllamaStream {
        let request = ChatRequest {
            model: settings.model.clone(),
            messages: messages.to_vec(),
            stream: true,
            options: GenerateOptions {
                num_predict: settings.max_tokens,
                temperature: settings.temperature,
                seed: settings.seed,
            },
        };
        let url = format!("{}/api/chat", self.base_url);
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let token = CancellationToken::new();

        let client = self.client.clone();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let result = tokio::select! {
                _ = task_token.cancelled() => {
                    tracing::debug!("chat stream cancelled");
                    return;
                }
                result = pump(&client, &url, &request, &tx) => result,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "chat stream failed");
                let _ = tx.send(Err(e)).await;
            }
        });

        OllamaStream {
            rx,
            token,
            task: Some(task),
        }
    }
}

fn model_matches(available: &str, wanted: &str) -> bool {
    available == wanted || (!wanted.contains(':') && available == format!("{}:latest", wanted))
}

async fn pump(
    client: &Client,
    url: &str,
    request: &ChatRequest,
    tx: &mpsc::Sender<Result<String, SourceError>>,
) -> Result<(), SourceError> {
    tracing::debug!(url, model = %request.model, messages = request.messages.len(), "starting chat stream");

    let response = client
        .post(url)
        .json(request)
        .send()
        .await
        .map_err(|source| SourceError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let mut stream = response.bytes_stream();
    let mut framer = LineFramer::default();
    let mut chunk_text = ChunkText::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| SourceError::Request {
            url: url.to_string(),
            source,
        })?;
        for line in framer.push(&chunk) {
            if forward(&line, &mut chunk_text, tx).await? {
                return Ok(());
            }
        }
    }

    if let Some(line) = framer.finish() {
        if forward(&line, &mut chunk_text, tx).await? {
            return Ok(());
        }
    }

    Err(SourceError::Disconnected)
}

/// Send the content of one line downstream. `Ok(true)` means stop reading:
/// either the model is done or nobody is listening anymore.
async fn forward(
    line: &[u8],
    chunk_text: &mut ChunkText,
    tx: &mpsc::Sender<Result<String, SourceError>>,
) -> Result<bool, SourceError> {
    let Some(chunk) = decode_line(line)? else {
        return Ok(false);
    };
    if let Some(error) = chunk.error {
        return Err(SourceError::Remote(error));
    }
    if let Some(message) = chunk.message {
        let text = chunk_text.text(&message);
        if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
            return Ok(true);
        }
    }
    Ok(chunk.done)
}

fn decode_line(line: &[u8]) -> Result<Option<ChatChunk>, SourceError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(line)?))
}

/// Splits a byte stream into newline-terminated lines. Network chunks can end
/// anywhere, including inside a multi-byte character, so framing happens on
/// bytes before anything is decoded.
#[derive(Default)]
struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

pub struct OllamaStream {
    rx: mpsc::Receiver<Result<String, SourceError>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl TokenSource for OllamaStream {
    async fn next_fragment(&mut self) -> Result<Option<String>, SourceError> {
        match self.rx.recv().await {
            Some(Ok(fragment)) => Ok(Some(fragment)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn cancel(&mut self) {
        self.token.cancel();
        self.rx.close();
        // Fragments already buffered belong to a turn that is over
        while self.rx.try_recv().is_ok() {}
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "chat stream task ended abnormally");
            }
        }
    }
}

impl Drop for OllamaStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
