//! Quiz content retrieval and result submission.
//!
//! HTTP client against the education platform API, plus a local JSON file
//! source for offline runs. Result submission is best-effort: failures are
//! logged, never retried, and never block the spoken summary.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::quiz::{QuestionOutcome, Quiz};

#[derive(Debug, Clone, Error)]
pub enum QuizLoadError {
    #[error("quiz request failed: {0}")]
    Request(String),

    #[error("quiz '{0}' not found")]
    NotFound(String),

    #[error("malformed quiz payload: {0}")]
    Malformed(String),

    #[error("cannot read quiz file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Everything submitted back to the platform when a session ends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeReport {
    pub quiz_id: String,
    pub score: usize,
    pub total_questions: usize,
    pub outcomes: Vec<QuestionOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[async_trait]
pub trait QuizProvider: Send + Sync {
    async fn fetch_quiz(&self, quiz_id: &str) -> Result<Quiz, QuizLoadError>;
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn submit_outcomes(&self, report: &OutcomeReport) -> Result<(), String>;
}

pub struct QuizApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl QuizApiClient {
    pub fn new(config: &ApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl QuizProvider for QuizApiClient {
    async fn fetch_quiz(&self, quiz_id: &str) -> Result<Quiz, QuizLoadError> {
        let url = format!("{}/api/quizzes/{quiz_id}", self.base_url);
        debug!("Fetching quiz from {url}");

        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() {
                QuizLoadError::Request(format!("cannot connect to {}", self.base_url))
            } else if e.is_timeout() {
                QuizLoadError::Request("quiz request timed out".into())
            } else {
                QuizLoadError::Request(e.to_string())
            }
        })?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(QuizLoadError::NotFound(quiz_id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(QuizLoadError::Request(format!(
                "server returned {}",
                resp.status()
            )));
        }

        resp.json::<Quiz>()
            .await
            .map_err(|e| QuizLoadError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl ResultSink for QuizApiClient {
    async fn submit_outcomes(&self, report: &OutcomeReport) -> Result<(), String> {
        let url = format!("{}/api/quizzes/{}/results", self.base_url, report.quiz_id);

        match self.client.post(&url).json(report).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(
                    "Submitted {} outcome(s) for quiz '{}'",
                    report.outcomes.len(),
                    report.quiz_id
                );
                Ok(())
            }
            Ok(resp) => Err(format!("server returned {}", resp.status())),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Loads a quiz from a local JSON file, for offline and demo runs.
pub struct FileQuizSource {
    path: PathBuf,
}

impl FileQuizSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl QuizProvider for FileQuizSource {
    async fn fetch_quiz(&self, _quiz_id: &str) -> Result<Quiz, QuizLoadError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| QuizLoadError::File {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        serde_json::from_str(&contents).map_err(|e| QuizLoadError::Malformed(e.to_string()))
    }
}

/// Sink used when submission is disabled in config.
pub struct DiscardSink;

#[async_trait]
impl ResultSink for DiscardSink {
    async fn submit_outcomes(&self, report: &OutcomeReport) -> Result<(), String> {
        warn!(
            "Result submission disabled, discarding {} outcome(s) for quiz '{}'",
            report.outcomes.len(),
            report.quiz_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::Answer;

    #[test]
    fn report_serializes_with_api_field_names() {
        let report = OutcomeReport {
            quiz_id: "capitals".into(),
            score: 1,
            total_questions: 2,
            outcomes: vec![
                QuestionOutcome {
                    question_id: "q1".into(),
                    selected_option: Answer::Choice("Paris".into()),
                    is_correct: true,
                    time_spent_seconds: 4,
                },
                QuestionOutcome {
                    question_id: "q2".into(),
                    selected_option: Answer::Timeout,
                    is_correct: false,
                    time_spent_seconds: 30,
                },
            ],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["quizId"], "capitals");
        assert_eq!(value["totalQuestions"], 2);
        assert_eq!(value["outcomes"][0]["selectedOption"], "Paris");
        assert_eq!(value["outcomes"][0]["isCorrect"], true);
        assert_eq!(value["outcomes"][1]["selectedOption"], "timeout");
        assert_eq!(value["outcomes"][1]["timeSpentSeconds"], 30);
    }

    #[tokio::test]
    async fn file_source_loads_quiz_json() {
        let path = std::env::temp_dir().join(format!("quiz-narrator-test-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"id":"capitals","title":"Capitals","questions":[
                {"id":"q1","text":"Capital of France?","options":["Paris","Lyon"],"correctOption":"Paris"}
            ]}"#,
        )
        .unwrap();

        let quiz = FileQuizSource::new(path.clone())
            .fetch_quiz("ignored")
            .await
            .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(quiz.id, "capitals");
        assert_eq!(quiz.questions.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_reports_path() {
        let err = FileQuizSource::new(PathBuf::from("/nonexistent/quiz.json"))
            .fetch_quiz("ignored")
            .await
            .unwrap_err();
        assert!(matches!(err, QuizLoadError::File { .. }));
    }
}
