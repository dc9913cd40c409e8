//! Evaluation of untrusted submissions.
//!
//! A submission is a Rhai script whose value is a function (usually a closure
//! such as `|arr| { ... }`). Each validator compiles the script in a fresh
//! engine that has no module loading, no `eval`, no printing and no clock or
//! I/O packages, runs it with an empty scope, and calls the resulting function.
//! A progress hook aborts the run once the wall-clock deadline passes.

pub mod limits;

use std::time::{Duration, Instant};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, MoreStringPackage, Package,
};
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Module, Scope, Shared};
use serde_json::Value;

use codeclash_core::question::Validator;

pub use limits::SandboxLimits;

/// Extra time granted to a blocking evaluation before the async wrapper
/// gives up on it.
const BACKSTOP_GRACE: Duration = Duration::from_millis(250);

/// The progress hook reads the clock once per this many operations.
const CLOCK_CHECK_INTERVAL: u64 = 256;

#[derive(Debug)]
pub enum SandboxError {
    Empty,
    Parse(String),
    NotAFunction,
    Runtime(String),
    Timeout,
    Limit(String),
    Value(String),
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty submission"),
            Self::Parse(e) => write!(f, "parse error: {e}"),
            Self::NotAFunction => write!(f, "submission does not evaluate to a function"),
            Self::Runtime(e) => write!(f, "runtime error: {e}"),
            Self::Timeout => write!(f, "deadline exceeded"),
            Self::Limit(e) => write!(f, "resource limit exceeded: {e}"),
            Self::Value(e) => write!(f, "unrepresentable return value: {e}"),
        }
    }
}

impl std::error::Error for SandboxError {}

impl SandboxError {
    fn from_eval(err: Box<EvalAltResult>) -> Self {
        match *err {
            EvalAltResult::ErrorTerminated(..) => Self::Timeout,
            EvalAltResult::ErrorTooManyOperations(..)
            | EvalAltResult::ErrorStackOverflow(..)
            | EvalAltResult::ErrorDataTooLarge(..) => Self::Limit(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Deadline-bounded evaluator. Cheap to clone; the interpreter packages are
/// built once and shared.
#[derive(Clone)]
pub struct CodeSandbox {
    limits: SandboxLimits,
    packages: Vec<Shared<Module>>,
}

impl CodeSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        let packages = vec![
            CorePackage::new().as_shared_module(),
            BasicArrayPackage::new().as_shared_module(),
            BasicMapPackage::new().as_shared_module(),
            BasicMathPackage::new().as_shared_module(),
            MoreStringPackage::new().as_shared_module(),
        ];
        Self { limits, packages }
    }

    /// The configured per-validator deadline.
    pub fn deadline(&self) -> Duration {
        self.limits.deadline()
    }

    fn engine(&self, deadline: Instant) -> Engine {
        let mut engine = Engine::new_raw();
        for module in &self.packages {
            engine.register_global_module(Shared::clone(module));
        }
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.on_print(|_| {});
        engine.on_debug(|_, _, _| {});

        let limits = &self.limits;
        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);

        engine.on_progress(move |ops| {
            if ops % CLOCK_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });
        engine
    }

    /// Run `code` against one validator. Every failure mode is an `Err`;
    /// `Ok(false)` means the function ran and returned the wrong value.
    pub fn evaluate(
        &self,
        code: &str,
        validator: &Validator,
        deadline: Duration,
    ) -> Result<bool, SandboxError> {
        if code.trim().is_empty() {
            return Err(SandboxError::Empty);
        }

        let (args, expected) = match validator {
            Validator::Accept => return Ok(true),
            Validator::Returns { args, expected } => (args, expected),
        };

        let engine = self.engine(Instant::now() + deadline);
        let ast = engine
            .compile(code)
            .map_err(|e| SandboxError::Parse(e.to_string()))?;
        let value = engine
            .eval_ast_with_scope::<Dynamic>(&mut Scope::new(), &ast)
            .map_err(SandboxError::from_eval)?;
        let function = value
            .try_cast::<FnPtr>()
            .ok_or(SandboxError::NotAFunction)?;

        let args = args
            .iter()
            .map(|arg| rhai::serde::to_dynamic(arg).map_err(SandboxError::from_eval))
            .collect::<Result<Vec<Dynamic>, _>>()?;
        let result: Dynamic = function
            .call(&engine, &ast, args)
            .map_err(SandboxError::from_eval)?;
        let actual: Value =
            rhai::serde::from_dynamic(&result).map_err(|e| SandboxError::Value(e.to_string()))?;

        Ok(values_match(&actual, expected))
    }

    /// True only if every validator accepts `code`. Failures are rejections.
    pub fn passes(&self, code: &str, validators: &[Validator], deadline: Duration) -> bool {
        validators
            .iter()
            .enumerate()
            .all(|(i, validator)| match self.evaluate(code, validator, deadline) {
                Ok(true) => true,
                Ok(false) => {
                    tracing::debug!(validator = i, "Submission returned the wrong value");
                    false
                },
                Err(e) => {
                    tracing::debug!(validator = i, error = %e, "Submission rejected");
                    false
                },
            })
    }

    /// Run [`CodeSandbox::passes`] on the blocking pool so the caller's task
    /// is never stalled by a slow submission.
    pub async fn evaluate_submission(
        &self,
        code: String,
        validators: Vec<Validator>,
        deadline: Duration,
    ) -> bool {
        let budget = deadline.saturating_mul(validator_count(&validators)) + BACKSTOP_GRACE;
        let sandbox = self.clone();
        let task =
            tokio::task::spawn_blocking(move || sandbox.passes(&code, &validators, deadline));

        match tokio::time::timeout(budget, task).await {
            Ok(Ok(passed)) => passed,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Sandbox task failed");
                false
            },
            Err(_) => {
                tracing::warn!(?budget, "Sandbox evaluation overran its budget");
                false
            },
        }
    }
}

impl Default for CodeSandbox {
    fn default() -> Self {
        Self::new(SandboxLimits::default())
    }
}

/// Number of deadlines a submission may spend, one per validator.
fn validator_count(validators: &[Validator]) -> u32 {
    u32::try_from(validators.len().max(1)).unwrap_or(u32::MAX)
}

/// Structural equality where numbers compare by value, so `8` matches `8.0`.
fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => {
            a == b
                || matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y))
                    if (x - y).abs() <= 1e-9 * x.abs().max(y.abs()).max(1.0))
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_match(x, y))
        },
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, x)| b.get(k).is_some_and(|y| values_match(x, y)))
        },
        _ => actual == expected,
    }
}
