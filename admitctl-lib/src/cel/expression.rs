use crate::Result;
use cel_interpreter::{Context, Program, Value};
use ohno::{IntoAppError, app_err};
use std::sync::Arc;

/// A named CEL expression compiled once and evaluated many times
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    name: String,
    source: String,
    program: Arc<Program>,
}

impl CompiledExpression {
    pub fn compile(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();
        let program = Program::compile(source).map_err(|e| app_err!("could not compile expression '{name}': {e}"))?;

        Ok(Self {
            name,
            source: source.to_string(),
            program: Arc::new(program),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, context: &Context<'_>) -> Result<Value> {
        self.program
            .execute(context)
            .into_app_err_with(|| format!("could not evaluate expression '{}'", self.name))
    }

    pub fn evaluate_bool(&self, context: &Context<'_>) -> Result<bool> {
        match self.evaluate(context)? {
            Value::Bool(b) => Ok(b),
            other => Err(app_err!("expression '{}' did not return a boolean, got '{other:?}' instead", self.name)),
        }
    }
}
