use super::CompiledExpression;
use crate::Result;
use crate::policy::{AdmissionValidation, MatchCondition, NamedExpression};
use cel_interpreter::{Context, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Binding under which computed policy variables are visible to expressions
pub const VARIABLES_BINDING: &str = "variables";

/// Evaluate `variables` in order, making each visible to the ones after it
pub fn bind_variables(context: &mut Context<'_>, variables: &[NamedExpression]) -> Result<()> {
    let mut values: HashMap<Arc<String>, Value> = HashMap::with_capacity(variables.len());
    context.add_variable_from_value(VARIABLES_BINDING, Value::Map(values.clone().into()));

    for variable in variables {
        let expression = CompiledExpression::compile(format!("variables.{}", variable.name), &variable.expression)?;
        let value = expression.evaluate(context)?;
        let _ = values.insert(Arc::new(variable.name.clone()), value);
        context.add_variable_from_value(VARIABLES_BINDING, Value::Map(values.clone().into()));
    }
    Ok(())
}

/// Whether every condition holds; no conditions means a match
pub fn conditions_hold(context: &Context<'_>, conditions: &[MatchCondition]) -> Result<bool> {
    for condition in conditions {
        let expression = CompiledExpression::compile(&condition.name, &condition.expression)?;
        if !expression.evaluate_bool(context)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate every validation, returning the messages of the ones that failed
pub fn failed_validations(context: &Context<'_>, validations: &[AdmissionValidation]) -> Result<Vec<String>> {
    let mut failures = Vec::new();
    for (index, validation) in validations.iter().enumerate() {
        let expression = CompiledExpression::compile(format!("validations[{index}]"), &validation.expression)?;
        if !expression.evaluate_bool(context)? {
            failures.push(
                validation
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("failed expression: {}", validation.expression)),
            );
        }
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cel::to_cel_value;
    use serde_json::json;

    fn context() -> Context<'static> {
        let mut context = Context::default();
        context.add_variable_from_value("object", to_cel_value(&json!({"spec": {"replicas": 5}})));
        context
    }

    fn named(name: &str, expression: &str) -> NamedExpression {
        NamedExpression {
            name: name.into(),
            expression: expression.into(),
        }
    }

    fn validation(expression: &str, message: Option<&str>) -> AdmissionValidation {
        AdmissionValidation {
            expression: expression.into(),
            message: message.map(String::from),
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_variables_see_earlier_variables() {
        let mut context = context();
        bind_variables(
            &mut context,
            &[named("replicas", "object.spec.replicas"), named("doubled", "variables.replicas * 2")],
        )
        .unwrap();

        let failures = failed_validations(&context, &[validation("variables.doubled == 10", None)]).unwrap();
        assert!(failures.is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_failure_messages() {
        let context = context();
        let failures = failed_validations(
            &context,
            &[
                validation("object.spec.replicas < 3", Some("too many replicas")),
                validation("object.spec.replicas < 4", None),
                validation("object.spec.replicas > 1", None),
            ],
        )
        .unwrap();
        assert_eq!(failures, ["too many replicas", "failed expression: object.spec.replicas < 4"]);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_conditions() {
        let context = context();
        let condition = |expression: &str| MatchCondition {
            name: "c".into(),
            expression: expression.into(),
        };
        assert!(conditions_hold(&context, &[]).unwrap());
        assert!(conditions_hold(&context, &[condition("object.spec.replicas == 5")]).unwrap());
        assert!(!conditions_hold(&context, &[condition("true"), condition("false")]).unwrap());
        let _ = conditions_hold(&context, &[condition("object.spec.replicas")]).unwrap_err();
    }
}
