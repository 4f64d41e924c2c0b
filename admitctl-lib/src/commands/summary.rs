//! Console rendering of evaluation outcomes

use crate::Result;
use crate::engine::{EngineResponse, RuleStatus};
use crate::processor::{Phase, ResultCounts};
use core::fmt::Write;
use owo_colors::OwoColorize;
use strum::IntoEnumIterator;

fn paint(text: &str, status: RuleStatus, use_colors: bool) -> String {
    if !use_colors {
        return text.to_string();
    }
    match status {
        RuleStatus::Pass => text.green().bold().to_string(),
        RuleStatus::Fail => text.red().bold().to_string(),
        RuleStatus::Warn => text.yellow().bold().to_string(),
        RuleStatus::Error => text.magenta().bold().to_string(),
        RuleStatus::Skip => text.dimmed().to_string(),
    }
}

/// List every rule outcome, grouped by policy and resource
pub fn write_details<W: Write>(writer: &mut W, responses: &[EngineResponse], use_colors: bool) -> Result<()> {
    for response in responses.iter().filter(|response| !response.is_empty()) {
        let resource = response.resource();
        writeln!(writer)?;
        writeln!(
            writer,
            "{} {} on {}/{}/{}",
            response.policy().kind(),
            response.policy_name(),
            resource.namespace(),
            resource.kind(),
            resource.name()
        )?;
        for rule in response.rules() {
            let status: &str = rule.status().into();
            writeln!(
                writer,
                "  {} {} ({}): {}",
                paint(status, rule.status(), use_colors),
                rule.name(),
                rule.rule_type(),
                rule.message()
            )?;
        }
    }
    Ok(())
}

/// Write the pass/fail/warn/error/skip totals, broken down by phase when `by_phase` is set
pub fn write_summary<W: Write>(writer: &mut W, counts: &ResultCounts, by_phase: bool, use_colors: bool) -> Result<()> {
    if by_phase {
        writeln!(writer)?;
        for phase in Phase::iter() {
            let tally = counts.phase(phase);
            if tally.total() == 0 {
                continue;
            }
            let line = RuleStatus::iter()
                .map(|status| format!("{}: {}", status, tally.get(status)))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(writer, "  {:<9} {line}", format!("{phase}:"))?;
        }
    }

    let totals = counts.totals();
    let line = RuleStatus::iter()
        .map(|status| {
            let label: &str = status.into();
            let count = totals.get(status);
            if count > 0 {
                format!("{}: {count}", paint(label, status, use_colors))
            } else {
                format!("{label}: {count}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(writer, "\n{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PolicyRef, RuleResponse, RuleType};
    use crate::resource::Resource;
    use serde_json::json;
    use std::sync::Arc;

    fn responses() -> Vec<EngineResponse> {
        let resource = Resource::from_value(json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "web", "namespace": "prod"}})).unwrap();
        let policy = serde_json::from_value(json!({"metadata": {"name": "require-team"}})).unwrap();
        vec![
            EngineResponse::new(resource.clone(), PolicyRef::Rule(Arc::new(policy)))
                .with_rules(vec![RuleResponse::fail("check-team", RuleType::Validation, "label 'team' is required")]),
            EngineResponse::new(resource, PolicyRef::Cel(Arc::default())),
        ]
    }

    #[test]
    fn test_details_without_colors() {
        let mut text = String::new();
        write_details(&mut text, &responses(), false).unwrap();
        assert_eq!(
            text,
            "\nClusterPolicy require-team on prod/Pod/web\n  fail check-team (Validation): label 'team' is required\n"
        );
    }

    #[test]
    fn test_summary_line() {
        let mut counts = ResultCounts::new();
        counts.add_engine_responses(false, &responses());

        let mut text = String::new();
        write_summary(&mut text, &counts, false, false).unwrap();
        assert_eq!(text, "\npass: 0, fail: 0, warn: 0, error: 0, skip: 0\n");
    }

    #[test]
    fn test_summary_by_phase_colors_nonzero_counts() {
        let mut counts = ResultCounts::new();
        counts.add_mutate_response(&responses()[0]);

        let mut text = String::new();
        write_summary(&mut text, &counts, true, true).unwrap();
        assert!(text.contains("mutate:"));
        assert!(!text.contains("validate:"));
        assert!(text.contains('\u{1b}'));
        assert!(text.starts_with("\n  mutate:   pass: 0, fail: 1,"));
        assert!(text.ends_with(", warn: 0, error: 0, skip: 0\n"));
    }
}
