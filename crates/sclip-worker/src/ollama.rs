//! Ollama client for transcript analysis.
//!
//! Sends the transcript to a local Ollama server in chunks, asks for clip
//! candidates as JSON, and ranks the merged results.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sclip_models::{Clip, JobParams, OutputProfile, Transcript};

use crate::collaborators::{AnalyzeError, Analyzer, CancelSignal};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async, RetryConfig};

/// Maximum characters of transcript per request.
pub const CHUNK_CHARS: usize = 3000;

/// Candidates at or below this confidence are dropped.
const MIN_CONFIDENCE: f64 = 0.3;
const MIN_CLIP_SECS: f64 = 5.0;
const MAX_CLIP_SECS: f64 = 300.0;
/// Start and end both within this many seconds count as the same clip.
const DUPLICATE_TOLERANCE_SECS: f64 = 2.0;
const MAX_CLIPS: usize = 20;

/// Ollama API client.
#[derive(Debug, Clone)]
pub struct OllamaAnalyzer {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
    retry: RetryConfig,
}

/// `/api/generate` request.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

/// `/api/generate` response.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// `/api/tags` response.
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ClipsPayload {
    #[serde(default)]
    clips: Vec<CandidateClip>,
}

/// Clip candidate as returned by the model.
#[derive(Debug, Clone, Deserialize)]
struct CandidateClip {
    #[serde(default)]
    title: String,
    start_time: f64,
    end_time: f64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    confidence: f64,
}

impl CandidateClip {
    fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

impl OllamaAnalyzer {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> WorkerResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WorkerError::config_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            retry: RetryConfig::new("ollama_generate"),
        })
    }

    pub fn from_config(config: &WorkerConfig) -> WorkerResult<Self> {
        Self::new(&config.ollama_url, &config.ollama_model, config.ollama_timeout)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Names of the models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<String>, AnalyzeError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        if !response.status().is_success() {
            return Err(AnalyzeError::Connection(format!("HTTP {} from {}", response.status(), url)));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| AnalyzeError::MalformedResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Verify the server is reachable and serves the configured model.
    pub async fn test_connection(&self) -> Result<(), AnalyzeError> {
        let models = self.list_models().await?;
        if models.iter().any(|m| m == &self.model) {
            info!("Ollama reachable, model {} available", self.model);
            Ok(())
        } else {
            Err(AnalyzeError::Connection(format!(
                "model '{}' not installed (available: {})",
                self.model,
                models.join(", ")
            )))
        }
    }

    /// One generate call, parsed into candidates.
    async fn generate(&self, prompt: &str) -> Result<Vec<CandidateClip>, AnalyzeError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.7,
                top_p: 0.9,
                num_predict: 2000,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzeError::Connection(format!("HTTP {}: {}", status, body)));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AnalyzeError::MalformedResponse(e.to_string()))?;
        if body.response.trim().is_empty() {
            return Err(AnalyzeError::MalformedResponse("empty response".to_string()));
        }
        debug!("Ollama response: {} chars", body.response.len());

        parse_candidates(&body.response)
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> AnalyzeError {
        if e.is_timeout() {
            AnalyzeError::Timeout(self.timeout.as_secs())
        } else {
            AnalyzeError::Connection(e.to_string())
        }
    }
}

#[async_trait]
impl Analyzer for OllamaAnalyzer {
    async fn analyze(
        &self,
        transcript: &Transcript,
        params: &JobParams,
        cancel: CancelSignal,
    ) -> Result<Vec<Clip>, AnalyzeError> {
        let chunks = split_transcript(&transcript.to_timed_text(), CHUNK_CHARS);
        info!(
            "Analyzing transcript in {} chunk(s) with model {}",
            chunks.len(),
            self.model
        );

        let mut candidates = Vec::new();
        let mut last_error = None;
        for (i, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(AnalyzeError::Cancelled);
            }
            let prompt = build_prompt(&params.context, &params.topics, params.profile, chunk);
            let (prompt, cancel) = (prompt.as_str(), &cancel);

            let attempt = retry_async(&self.retry, AnalyzeError::is_retryable, |_| async move {
                tokio::select! {
                    result = self.generate(prompt) => result,
                    _ = cancel.cancelled() => Err(AnalyzeError::Cancelled),
                }
            })
            .await;

            match attempt {
                Ok(found) => {
                    debug!("Chunk {}/{}: {} candidates", i + 1, chunks.len(), found.len());
                    candidates.extend(found);
                }
                Err((AnalyzeError::Cancelled, _)) => return Err(AnalyzeError::Cancelled),
                Err((e, attempts)) => {
                    warn!("Chunk {}/{} failed after {} attempt(s): {}", i + 1, chunks.len(), attempts, e);
                    last_error = Some(e);
                }
            }
        }

        // Only fail when nothing came back at all
        if candidates.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        Ok(rank_candidates(candidates)
            .into_iter()
            .filter_map(|c| {
                Clip::new(
                    0,
                    c.title,
                    c.description,
                    c.start_time,
                    c.end_time,
                    c.confidence.clamp(0.0, 1.0),
                    c.topics,
                )
                .ok()
            })
            .collect())
    }

    async fn check(&self) -> Result<(), String> {
        self.test_connection().await.map_err(|e| e.to_string())
    }
}

/// Build the analysis prompt for one transcript chunk.
pub fn build_prompt(context: &str, topics: &[String], profile: OutputProfile, transcript: &str) -> String {
    format!(
        r#"You are an expert video content analyst. Find every segment of this transcript that is worth turning into a standalone clip.

VIDEO CONTEXT:
{context}

TOPICS OF INTEREST:
{topics}

OUTPUT PROFILE: {profile}
- Target duration: {duration}
- Style: {style}
- Focus: {focus}

TRANSCRIPT (lines are prefixed with [HH:MM:SS] timestamps):
{transcript}

Select segments that:
- address the topics of interest directly
- contain valuable information or unique insights
- explain an important concept clearly
- give practical examples or data

Respond with JSON only, in this format:
{{
  "clips": [
    {{
      "title": "Descriptive clip title",
      "start_time": start_in_seconds,
      "end_time": end_in_seconds,
      "description": "What the clip contains and why it is valuable",
      "topics": ["topic"],
      "confidence": score_between_0.3_and_1.0
    }}
  ]
}}

Times must be in seconds and grounded in the transcript timestamps. Clips may overlap when they cover different aspects."#,
        context = context.trim(),
        topics = topics.iter().map(|t| t.trim()).collect::<Vec<_>>().join(", "),
        profile = profile,
        duration = profile.target_duration(),
        style = profile.style(),
        focus = profile.focus(),
        transcript = transcript,
    )
}

/// Split text on whitespace into chunks of at most `max_chars` characters.
///
/// A single word longer than `max_chars` becomes its own chunk.
pub fn split_transcript(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if !current.is_empty() && current_len + 1 + word_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Pull the outermost JSON object out of free-form model output.
fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

fn parse_candidates(content: &str) -> Result<Vec<CandidateClip>, AnalyzeError> {
    let json = extract_json(content)
        .ok_or_else(|| AnalyzeError::MalformedResponse("no JSON object in response".to_string()))?;
    let payload: ClipsPayload =
        serde_json::from_str(json).map_err(|e| AnalyzeError::MalformedResponse(e.to_string()))?;
    Ok(payload.clips)
}

/// Filter, order by confidence then start, drop near-duplicates, and cap.
fn rank_candidates(candidates: Vec<CandidateClip>) -> Vec<CandidateClip> {
    let mut valid: Vec<CandidateClip> = candidates
        .into_iter()
        .filter(|c| c.confidence > MIN_CONFIDENCE)
        .filter(|c| (MIN_CLIP_SECS..=MAX_CLIP_SECS).contains(&c.duration()))
        .collect();

    valid.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.start_time.total_cmp(&b.start_time))
    });

    let mut unique: Vec<CandidateClip> = Vec::new();
    for clip in valid {
        let duplicate = unique.iter().any(|kept| {
            (kept.start_time - clip.start_time).abs() < DUPLICATE_TOLERANCE_SECS
                && (kept.end_time - clip.end_time).abs() < DUPLICATE_TOLERANCE_SECS
        });
        if !duplicate {
            unique.push(clip);
        }
        if unique.len() == MAX_CLIPS {
            break;
        }
    }
    unique
}
