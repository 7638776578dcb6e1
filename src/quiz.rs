//! Quiz data model.
//!
//! Questions and quizzes are immutable once loaded. An outcome is recorded
//! exactly once per question and never mutated afterwards.

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Structural problems in loaded quiz content. A malformed quiz is not
/// played; the session ends immediately with an empty outcome log.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("question '{question_id}' has {count} option(s), need at least two")]
    TooFewOptions { question_id: String, count: usize },

    #[error("question '{question_id}' has duplicate options")]
    DuplicateOptions { question_id: String },

    #[error("question '{question_id}' marks '{correct}' correct but has no such option")]
    UnknownCorrectOption { question_id: String, correct: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: String,
}

impl Question {
    pub fn validate(&self) -> Result<(), ContentError> {
        if self.options.len() < 2 {
            return Err(ContentError::TooFewOptions {
                question_id: self.id.clone(),
                count: self.options.len(),
            });
        }

        for (i, option) in self.options.iter().enumerate() {
            if self.options[..i].contains(option) {
                return Err(ContentError::DuplicateOptions {
                    question_id: self.id.clone(),
                });
            }
        }

        if !self.options.contains(&self.correct_option) {
            return Err(ContentError::UnknownCorrectOption {
                question_id: self.id.clone(),
                correct: self.correct_option.clone(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Quiz {
    /// Check every question. An empty quiz is valid; it just plays nothing.
    pub fn validate(&self) -> Result<(), ContentError> {
        for question in &self.questions {
            question.validate()?;
        }
        Ok(())
    }
}

/// What the user did with a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// One of the question's options was chosen.
    Choice(String),
    /// The countdown reached zero before any choice.
    Timeout,
    /// The session ended before this question was resolved.
    Unanswered,
}

impl Answer {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Choice(option) => option,
            Self::Timeout => "timeout",
            Self::Unanswered => "skipped-unanswered",
        }
    }
}

impl std::fmt::Display for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Answer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Recorded result for one question. Append-only: created once when the
/// question resolves, never rewritten.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub question_id: String,
    pub selected_option: Answer,
    pub is_correct: bool,
    pub time_spent_seconds: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(options: &[&str], correct: &str) -> Question {
        Question {
            id: "q1".into(),
            text: "What is 2 + 2?".into(),
            options: options.iter().map(|s| s.to_string()).collect(),
            correct_option: correct.into(),
        }
    }

    #[test]
    fn valid_question_passes() {
        assert_eq!(question(&["3", "4"], "4").validate(), Ok(()));
    }

    #[test]
    fn single_option_is_rejected() {
        assert_eq!(
            question(&["4"], "4").validate(),
            Err(ContentError::TooFewOptions {
                question_id: "q1".into(),
                count: 1,
            })
        );
    }

    #[test]
    fn duplicate_options_are_rejected() {
        assert_eq!(
            question(&["4", "4"], "4").validate(),
            Err(ContentError::DuplicateOptions {
                question_id: "q1".into(),
            })
        );
    }

    #[test]
    fn correct_option_must_exist() {
        assert_eq!(
            question(&["3", "4"], "5").validate(),
            Err(ContentError::UnknownCorrectOption {
                question_id: "q1".into(),
                correct: "5".into(),
            })
        );
    }

    #[test]
    fn quiz_parses_from_api_payload() {
        let quiz: Quiz = serde_json::from_str(
            r#"{
                "id": "capitals",
                "title": "Capitals",
                "questions": [
                    {
                        "id": "q1",
                        "text": "Capital of France?",
                        "options": ["Paris", "Lyon"],
                        "correctOption": "Paris"
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(quiz.questions.len(), 1);
        assert_eq!(quiz.questions[0].correct_option, "Paris");
        assert_eq!(quiz.validate(), Ok(()));
    }

    #[test]
    fn answers_serialize_as_strings() {
        let json = |a: &Answer| serde_json::to_string(a).unwrap();
        assert_eq!(json(&Answer::Choice("Paris".into())), "\"Paris\"");
        assert_eq!(json(&Answer::Timeout), "\"timeout\"");
        assert_eq!(json(&Answer::Unanswered), "\"skipped-unanswered\"");
    }
}
