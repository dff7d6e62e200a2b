//! Append-only feedback log for the offline fine-tuning job.
//!
//! Each entry is one JSON object per line:
//! `{prompt, completion, requestId, rating, timestamp}`. The core only ever
//! appends to this file and never reads it back.

use crate::synthesizer::Answer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

/// Answers kept for later rating.
const DEFAULT_REMEMBERED: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Helpful,
    NotHelpful,
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rating::Helpful => f.write_str("helpful"),
            Rating::NotHelpful => f.write_str("not-helpful"),
        }
    }
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "helpful" | "up" | "+1" => Ok(Rating::Helpful),
            "not-helpful" | "unhelpful" | "down" | "-1" => Ok(Rating::NotHelpful),
            other => Err(format!("unknown rating '{}', expected helpful or not-helpful", other)),
        }
    }
}

/// One rated answer, as consumed by the fine-tuning job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    /// The question re-expressed as an instruction
    pub prompt: String,
    /// Final answer text
    pub completion: String,
    pub request_id: String,
    pub rating: Rating,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackEntry {
    pub fn from_answer(answer: &Answer, rating: Rating) -> Self {
        Self::new(&answer.query, &answer.text, &answer.request_id, rating)
    }

    pub fn new(question: &str, completion: &str, request_id: &str, rating: Rating) -> Self {
        Self {
            prompt: instruction(question),
            completion: completion.to_string(),
            request_id: request_id.to_string(),
            rating,
            timestamp: Utc::now(),
        }
    }
}

fn instruction(question: &str) -> String {
    format!(
        "Answer the following question using only the enterprise knowledge sources, citing each source you use: {}",
        question
    )
}

/// Accepts ratings without blocking the caller. Write failures are logged,
/// never returned.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    /// Keep a snapshot of `answer` so it can be rated by request id.
    fn remember(&self, answer: &Answer);

    /// Rate a remembered answer. Returns `false` when the request id is unknown.
    fn record(&self, request_id: &str, rating: Rating) -> bool;

    /// Append a complete entry.
    fn submit(&self, entry: FeedbackEntry);

    /// Wait until every accepted entry has been written.
    async fn flush(&self);
}

enum Command {
    Append(FeedbackEntry),
    Flush(oneshot::Sender<()>),
}

struct Snapshot {
    question: String,
    completion: String,
}

#[derive(Default)]
struct Remembered {
    order: VecDeque<String>,
    answers: HashMap<String, Snapshot>,
}

/// JSON-lines sink with a single background writer task.
pub struct JsonlFeedbackSink {
    path: PathBuf,
    tx: mpsc::UnboundedSender<Command>,
    remembered: Mutex<Remembered>,
    capacity: usize,
}

impl JsonlFeedbackSink {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, DEFAULT_REMEMBERED)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(path.clone(), rx));
        Self {
            path,
            tx,
            remembered: Mutex::new(Remembered::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FeedbackSink for JsonlFeedbackSink {
    fn remember(&self, answer: &Answer) {
        let mut remembered = self.remembered.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = Snapshot {
            question: answer.query.clone(),
            completion: answer.text.clone(),
        };
        if remembered
            .answers
            .insert(answer.request_id.clone(), snapshot)
            .is_none()
        {
            remembered.order.push_back(answer.request_id.clone());
        }
        while remembered.order.len() > self.capacity {
            if let Some(oldest) = remembered.order.pop_front() {
                remembered.answers.remove(&oldest);
            }
        }
    }

    fn record(&self, request_id: &str, rating: Rating) -> bool {
        let entry = {
            let remembered = self.remembered.lock().unwrap_or_else(PoisonError::into_inner);
            remembered
                .answers
                .get(request_id)
                .map(|s| FeedbackEntry::new(&s.question, &s.completion, request_id, rating))
        };

        match entry {
            Some(entry) => {
                self.submit(entry);
                true
            }
            None => {
                tracing::warn!(request_id, "Feedback for an unknown request dropped");
                false
            }
        }
    }

    fn submit(&self, entry: FeedbackEntry) {
        tracing::debug!(request_id = %entry.request_id, rating = %entry.rating, "Feedback accepted");
        if self.tx.send(Command::Append(entry)).is_err() {
            tracing::warn!(path = %self.path.display(), "Feedback writer has stopped, entry dropped");
        }
    }

    async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn write_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Append(entry) => {
                let line = match serde_json::to_string(&entry) {
                    Ok(json) => json + "\n",
                    Err(e) => {
                        tracing::warn!(error = %e, "Cannot serialize feedback entry");
                        continue;
                    }
                };
                if let Err(first) = append_line(&path, &line).await {
                    tracing::debug!(error = %first, "Feedback write failed, retrying once");
                    if let Err(e) = append_line(&path, &line).await {
                        tracing::warn!(
                            path = %path.display(),
                            request_id = %entry.request_id,
                            error = %e,
                            "Feedback entry could not be written"
                        );
                    }
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.sync_data().await
}
