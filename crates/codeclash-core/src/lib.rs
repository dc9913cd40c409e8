pub mod net;
pub mod player;
pub mod question;
pub mod session;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::question::{Question, QuestionBank, Validator};

    /// A correct Rhai solution for the first built-in question.
    pub const ADJACENT_PRODUCTS_SOLUTION: &str =
        "|arr| { let total = 0; for i in 1..arr.len() { total += arr[i - 1] * arr[i]; } total }";

    /// A correct Rhai solution for the second built-in question.
    pub const LARGEST_SOLUTION: &str =
        "|arr| { let best = arr[0]; for x in arr { if x > best { best = x; } } best }";

    /// A submission that never returns.
    pub const INFINITE_LOOP: &str = "|arr| { loop { } }";

    /// Create a bank of `n` questions that each accept any non-empty code.
    pub fn accepting_bank(n: usize) -> QuestionBank {
        let questions = (0..n)
            .map(|i| Question {
                prompt: format!("Question {}", i + 1),
                code_template: None,
                validators: vec![Validator::Accept],
            })
            .collect();
        QuestionBank::new(questions).expect("accepting bank is valid")
    }

    /// Create a bank of `n` questions that each want a function doubling its input.
    pub fn doubling_bank(n: usize) -> QuestionBank {
        let questions = (0..n)
            .map(|i| Question {
                prompt: format!("Double the input ({})", i + 1),
                code_template: Some("|n| { }".to_string()),
                validators: vec![Validator::Returns {
                    args: vec![serde_json::json!(21)],
                    expected: serde_json::json!(42),
                }],
            })
            .collect();
        QuestionBank::new(questions).expect("doubling bank is valid")
    }
}
