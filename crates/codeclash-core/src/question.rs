use std::path::Path;

use serde::{Deserialize, Serialize};

/// A check a submission must pass. Validators are data; only the sandbox
/// executes the submission they describe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validator {
    /// Accepts any non-empty submission.
    Accept,
    /// Calls the submitted function with `args` and expects `expected` back.
    Returns {
        #[serde(default)]
        args: Vec<serde_json::Value>,
        expected: serde_json::Value,
    },
}

/// One timed challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    #[serde(default)]
    pub code_template: Option<String>,
    pub validators: Vec<Validator>,
}

#[derive(Debug)]
pub enum QuestionBankError {
    OutOfRange { index: usize, count: usize },
    Empty,
    NoValidators(usize),
    Io(String),
    Parse(String),
}

impl std::fmt::Display for QuestionBankError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange { index, count } => {
                write!(f, "question {index} out of range (bank has {count})")
            },
            Self::Empty => write!(f, "question bank is empty"),
            Self::NoValidators(i) => write!(f, "question {i} has no validators"),
            Self::Io(e) => write!(f, "failed to read question bank: {e}"),
            Self::Parse(e) => write!(f, "failed to parse question bank: {e}"),
        }
    }
}

impl std::error::Error for QuestionBankError {}

#[derive(Deserialize)]
struct QuestionFile {
    questions: Vec<Question>,
}

/// Ordered, immutable sequence of questions. Never empty.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    questions: Vec<Question>,
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Result<Self, QuestionBankError> {
        if questions.is_empty() {
            return Err(QuestionBankError::Empty);
        }
        if let Some(i) = questions.iter().position(|q| q.validators.is_empty()) {
            return Err(QuestionBankError::NoValidators(i));
        }
        Ok(Self { questions })
    }

    /// The bank shipped with the server.
    pub fn builtin() -> Self {
        Self {
            questions: vec![
                Question {
                    prompt: "Write a function that accepts an array of numbers as a parameter \
                             and returns the sum of multiplication of every two adjacent cells"
                        .to_string(),
                    code_template: Some("|arr| { }".to_string()),
                    validators: vec![
                        Validator::Returns {
                            args: vec![serde_json::json!([1, 2, 3])],
                            expected: serde_json::json!(8),
                        },
                        Validator::Returns {
                            args: vec![serde_json::json!([2, 2, 2, 2])],
                            expected: serde_json::json!(12),
                        },
                    ],
                },
                Question {
                    prompt: "Write a function that accepts a non-empty array of numbers and \
                             returns the largest one"
                        .to_string(),
                    code_template: Some("|arr| { }".to_string()),
                    validators: vec![
                        Validator::Returns {
                            args: vec![serde_json::json!([3, 9, 2])],
                            expected: serde_json::json!(9),
                        },
                        Validator::Returns {
                            args: vec![serde_json::json!([-4, -7])],
                            expected: serde_json::json!(-4),
                        },
                    ],
                },
            ],
        }
    }

    /// Parse a bank from TOML (`[[questions]]` tables).
    pub fn from_toml_str(content: &str) -> Result<Self, QuestionBankError> {
        let file: QuestionFile =
            toml::from_str(content).map_err(|e| QuestionBankError::Parse(e.to_string()))?;
        Self::new(file.questions)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, QuestionBankError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| QuestionBankError::Io(e.to_string()))?;
        let bank = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), count = bank.count(), "Loaded question bank");
        Ok(bank)
    }

    pub fn get(&self, index: usize) -> Result<&Question, QuestionBankError> {
        self.questions
            .get(index)
            .ok_or(QuestionBankError::OutOfRange {
                index,
                count: self.questions.len(),
            })
    }

    pub fn count(&self) -> usize {
        self.questions.len()
    }
}
