//! Boundary to the expression evaluator used for reaction terms.
//!
//! The integrator never parses mathematics itself. It asks an
//! [`EvaluatorFactory`] for a [`SymbolicEvaluator`] bound to a list of
//! expressions and a fixed variable ordering, compiles it once and then
//! evaluates it per voxel.

mod meval_evaluator;

pub use meval_evaluator::{MevalEvaluator, MevalFactory};

/// A compiled vector-valued function of an ordered list of variables.
pub trait SymbolicEvaluator: Send + Sync {
    /// Prepare for evaluation; on failure [`SymbolicEvaluator::error_message`] says why.
    fn compile(&mut self) -> bool;

    /// Evaluate every expression: `results[k] = expressions[k](inputs)`.
    ///
    /// Evaluation failures produce NaN in the affected slot.
    fn eval(&self, results: &mut [f64], inputs: &[f64]);

    fn error_message(&self) -> &str;
}

/// Creates evaluators; shared by every backend built from a model.
pub trait EvaluatorFactory: Send + Sync {
    fn create(
        &self,
        expressions: &[String],
        variables: &[String],
        constants: &[(String, f64)],
    ) -> Box<dyn SymbolicEvaluator>;
}

/// Create and compile, returning the evaluator's message on failure.
pub fn compile(
    factory: &dyn EvaluatorFactory,
    expressions: &[String],
    variables: &[String],
    constants: &[(String, f64)],
) -> Result<Box<dyn SymbolicEvaluator>, String> {
    let mut evaluator = factory.create(expressions, variables, constants);
    if evaluator.compile() {
        Ok(evaluator)
    } else {
        Err(evaluator.error_message().to_string())
    }
}

/// True if `symbol` occurs as a whole identifier in `expression`.
pub fn mentions_symbol(expression: &str, symbol: &str) -> bool {
    identifiers(expression).any(|id| id == symbol)
}

/// Identifiers (`[A-Za-z_][A-Za-z0-9_]*`) appearing in an expression.
pub fn identifiers<'a>(expression: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    let bytes = expression.as_bytes();
    let mut i = 0;
    std::iter::from_fn(move || {
        while i < bytes.len() {
            let c = bytes[i];
            if c.is_ascii_alphabetic() || c == b'_' {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                return Some(&expression[start..i]);
            }
            if c.is_ascii_digit() || c == b'.' {
                // skip numeric literals including exponents such as 1e-3
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                    i += 1;
                }
                continue;
            }
            i += 1;
        }
        None
    })
}
