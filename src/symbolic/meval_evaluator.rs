//! Expression evaluator backed by `meval`.

use std::collections::HashMap;
use std::str::FromStr;

use meval::{Context, ContextProvider, Expr, FuncEvalError};

use super::{identifiers, EvaluatorFactory, SymbolicEvaluator};

thread_local! {
    // built-in functions and constants (exp, ln, sqrt, pi, e, ...)
    static BUILTINS: Context<'static> = Context::new();
}

/// Factory for [`MevalEvaluator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MevalFactory;

impl EvaluatorFactory for MevalFactory {
    fn create(
        &self,
        expressions: &[String],
        variables: &[String],
        constants: &[(String, f64)],
    ) -> Box<dyn SymbolicEvaluator> {
        Box::new(MevalEvaluator::new(expressions, variables, constants))
    }
}

/// Evaluates a list of expressions over an ordered set of variables.
///
/// Variables shadow constants, which shadow the `meval` built-ins.
pub struct MevalEvaluator {
    sources: Vec<String>,
    variables: HashMap<String, usize>,
    constants: HashMap<String, f64>,
    compiled: Vec<Expr>,
    /// first variable name listed twice, if any
    duplicate: Option<String>,
    error: String,
}

struct Inputs<'a> {
    variables: &'a HashMap<String, usize>,
    constants: &'a HashMap<String, f64>,
    values: &'a [f64],
}

impl ContextProvider for Inputs<'_> {
    fn get_var(&self, name: &str) -> Option<f64> {
        match self.variables.get(name) {
            Some(&i) => self.values.get(i).copied(),
            None => self.constants.get(name).copied(),
        }
    }
}

impl MevalEvaluator {
    pub fn new(expressions: &[String], variables: &[String], constants: &[(String, f64)]) -> Self {
        let mut slots = HashMap::with_capacity(variables.len());
        let mut duplicate = None;
        for (i, v) in variables.iter().enumerate() {
            if slots.insert(v.clone(), i).is_some() && duplicate.is_none() {
                duplicate = Some(v.clone());
            }
        }
        Self {
            sources: expressions.to_vec(),
            variables: slots,
            constants: constants.iter().cloned().collect(),
            compiled: Vec::new(),
            duplicate,
            error: String::new(),
        }
    }

    fn eval_one(&self, expr: &Expr, values: &[f64]) -> Result<f64, meval::Error> {
        let inputs = Inputs {
            variables: &self.variables,
            constants: &self.constants,
            values,
        };
        BUILTINS.with(|builtins| expr.eval_with_context((inputs, builtins)))
    }

    fn describe(source: &str, error: &meval::Error) -> String {
        match error {
            meval::Error::UnknownVariable(name) => {
                format!("Unknown symbol '{}' in expression '{}'", name, source)
            }
            meval::Error::Function(name, FuncEvalError::UnknownFunction) => {
                format!("Unknown function '{}' in expression '{}'", name, source)
            }
            other => format!("Failed to compile expression '{}': {}", source, other),
        }
    }
}

impl SymbolicEvaluator for MevalEvaluator {
    fn compile(&mut self) -> bool {
        self.error.clear();
        self.compiled.clear();
        if let Some(name) = &self.duplicate {
            self.error = format!("Variable '{}' is defined more than once", name);
            return false;
        }
        let trial = vec![1.0; self.variables.len()];
        for source in &self.sources {
            let expr = match Expr::from_str(source) {
                Ok(expr) => expr,
                Err(e) => {
                    self.error = Self::describe(source, &e);
                    return false;
                }
            };
            match self.eval_one(&expr, &trial) {
                Ok(value) => {
                    // a result that cannot depend on the inputs must be representable
                    let uses_variables = identifiers(source).any(|id| self.variables.contains_key(id));
                    if !uses_variables && !value.is_finite() {
                        self.error = format!(
                            "Expression '{}' evaluates to a non-finite value ({})",
                            source, value
                        );
                        return false;
                    }
                }
                Err(e) => {
                    self.error = Self::describe(source, &e);
                    return false;
                }
            }
            self.compiled.push(expr);
        }
        true
    }

    fn eval(&self, results: &mut [f64], inputs: &[f64]) {
        for (result, expr) in results.iter_mut().zip(&self.compiled) {
            *result = self.eval_one(expr, inputs).unwrap_or(f64::NAN);
        }
    }

    fn error_message(&self) -> &str {
        &self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(s: &[&str]) -> Vec<String> {
        s.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_eval_with_variables_and_constants() {
        let mut ev = MevalEvaluator::new(
            &strings(&["k * a - b", "exp(0) + pi - pi"]),
            &strings(&["a", "b"]),
            &[("k".to_string(), 2.0)],
        );
        assert!(ev.compile(), "{}", ev.error_message());
        let mut out = [0.0; 2];
        ev.eval(&mut out, &[3.0, 1.0]);
        assert_eq!(out, [5.0, 1.0]);
    }

    #[test]
    fn test_unknown_symbol() {
        let mut ev = MevalEvaluator::new(&strings(&["a * q"]), &strings(&["a"]), &[]);
        assert!(!ev.compile());
        assert!(ev.error_message().contains("Unknown symbol 'q'"), "{}", ev.error_message());
    }

    #[test]
    fn test_unknown_function() {
        let mut ev = MevalEvaluator::new(&strings(&["frobnicate(a)"]), &strings(&["a"]), &[]);
        assert!(!ev.compile());
        assert!(ev.error_message().contains("Unknown function"), "{}", ev.error_message());
    }

    #[test]
    fn test_non_finite_constant_result() {
        let mut ev = MevalEvaluator::new(&strings(&["1/0"]), &strings(&["a"]), &[]);
        assert!(!ev.compile());
        assert!(ev.error_message().contains("non-finite"));
    }

    #[test]
    fn test_parse_error() {
        let mut ev = MevalEvaluator::new(&strings(&["a * (b"]), &strings(&["a", "b"]), &[]);
        assert!(!ev.compile());
        assert!(!ev.error_message().is_empty());
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let mut ev = MevalEvaluator::new(&strings(&["-x"]), &strings(&["x", "time", "x"]), &[]);
        assert!(!ev.compile());
        assert!(ev.error_message().contains("'x'"), "{}", ev.error_message());
    }
}
