//! Answering questions about the current dataset.

use crate::dataset::Dataset;
use crate::downloader::{summary_to_csv, to_csv};
use crate::error::ModelError;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
/// Transport limit for one `generateContent` request. Callers wait less than
/// this; it only bounds how long an abandoned request holds its connection.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub const TIMEOUT_REPLY: &str =
    "The analysis took too long to finish. Please try a simpler or more specific question.";
const FAILURE_REPLY: &str = "Something went wrong while generating the answer.";

lazy_static! {
    static ref MAX_QUESTION: Regex =
        Regex::new(r"(?i)\b(maior|máximo|maximo|max|maximum|largest|highest|biggest)\b").unwrap();
}

const VALUE_COLUMN_HINTS: [&str; 8] = [
    "valor", "preço", "venda", "total", "value", "price", "sale", "amount",
];

#[async_trait]
pub trait Analyst: Send + Sync {
    async fn answer(&self, question: &str, dataset: &Dataset) -> Result<String, ModelError>;
}

/// Prompt sent to the model: instruction, question, column summary and the
/// first `sample_rows` records.
pub fn build_prompt(question: &str, dataset: &Dataset, sample_rows: usize) -> String {
    format!(
        "You are a data analyst. Answer only from the data provided below.\n\
         Question: {question}\n\n\
         Dataset: {rows} rows, {cols} columns.\n\n\
         Column summary:\n{summary}\n\
         Sample ({sample} rows):\n{csv}",
        rows = dataset.len(),
        cols = dataset.columns().len(),
        summary = summary_to_csv(&dataset.describe()),
        sample = sample_rows.min(dataset.len()),
        csv = to_csv(&dataset.head(sample_rows)),
    )
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Gemini `generateContent` client.
pub struct GeminiAnalyst {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    sample_rows: usize,
}

impl GeminiAnalyst {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, sample_rows: usize) -> Self {
        Self {
            http: http_client(DEFAULT_REQUEST_TIMEOUT),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            sample_rows,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.http = http_client(timeout);
        self
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
        };

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(text);
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = parsed
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map(|r| format!("prompt blocked ({r})"))
                .unwrap_or_else(|| "no text in response".to_string());
            return Err(ModelError::Malformed(reason));
        }
        Ok(text)
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[async_trait]
impl Analyst for GeminiAnalyst {
    async fn answer(&self, question: &str, dataset: &Dataset) -> Result<String, ModelError> {
        let prompt = build_prompt(question, dataset, self.sample_rows);
        log::debug!("sending {} byte prompt to {}", prompt.len(), self.model);
        self.generate(&prompt).await
    }
}

/// Used when no model key is configured: describes the data and handles
/// "largest value" questions on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalAnalyst;

#[async_trait]
impl Analyst for LocalAnalyst {
    async fn answer(&self, question: &str, dataset: &Dataset) -> Result<String, ModelError> {
        let columns = dataset.columns();
        let mut lines = vec![
            "The language model is not configured; this answer was generated locally.".to_string(),
            format!("Rows: {}, Columns: {}", dataset.len(), columns.len()),
            format!(
                "Columns: {}",
                columns.iter().take(50).cloned().collect::<Vec<_>>().join(", ")
            ),
        ];

        if MAX_QUESTION.is_match(question) {
            let candidate = columns.iter().find(|c| {
                let lower = c.to_lowercase();
                VALUE_COLUMN_HINTS.iter().any(|hint| lower.contains(hint))
            });
            let max = candidate.and_then(|column| {
                dataset
                    .iter()
                    .filter_map(|r| r.get(column).and_then(|v| v.as_number()))
                    .fold(None, |best: Option<f64>, n| Some(best.map_or(n, |b| b.max(n))))
                    .map(|n| (column, n))
            });
            lines.push(match max {
                Some((column, n)) => format!(
                    "→ Column used: {}, largest value: {}",
                    column,
                    crate::dataset::CellValue::Number(n)
                ),
                None => "→ Could not compute the maximum locally.".to_string(),
            });
        }

        Ok(lines.join("\n"))
    }
}

/// Ask `analyst` with a wall-clock limit.
///
/// The call runs in its own task. When `timeout` elapses first the task is
/// abandoned, not cancelled: an in-flight request keeps running to completion
/// and its result is dropped. The task only owns its question and dataset
/// snapshot, so a late result cannot touch shared state.
pub async fn answer_with_timeout(
    analyst: Arc<dyn Analyst>,
    question: String,
    dataset: Dataset,
    timeout: Duration,
) -> String {
    let task = tokio::spawn(async move { analyst.answer(&question, &dataset).await });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(reply))) => reply,
        Ok(Ok(Err(err))) => {
            log::error!("model call failed: {}", err);
            format!("Could not generate an answer: {}", err)
        }
        Ok(Err(err)) => {
            log::error!("model task failed: {}", err);
            FAILURE_REPLY.to_string()
        }
        Err(_) => {
            log::warn!("model call exceeded {:?}, abandoning it", timeout);
            TIMEOUT_REPLY.to_string()
        }
    }
}
