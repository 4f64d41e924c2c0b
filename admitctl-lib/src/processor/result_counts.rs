use crate::engine::{EngineResponse, PolicyRef, RuleStatus};
use crate::policy::{FailureAction, Rule, RulePolicy};
use serde::Serialize;
use std::collections::BTreeMap;
use strum::{Display, EnumIter, IntoStaticStr};

/// The pipeline stage an outcome is counted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Display, EnumIter, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Mutate,
    Validate,
    Generate,
    Admission,
    Cel,
}

/// Outcome counts by disposition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub pass: usize,
    pub fail: usize,
    pub warn: usize,
    pub error: usize,
    pub skip: usize,
}

impl Tally {
    fn record(&mut self, status: RuleStatus) {
        *self.slot(status) += 1;
    }

    const fn slot(&mut self, status: RuleStatus) -> &mut usize {
        match status {
            RuleStatus::Pass => &mut self.pass,
            RuleStatus::Fail => &mut self.fail,
            RuleStatus::Warn => &mut self.warn,
            RuleStatus::Error => &mut self.error,
            RuleStatus::Skip => &mut self.skip,
        }
    }

    #[must_use]
    pub const fn get(&self, status: RuleStatus) -> usize {
        match status {
            RuleStatus::Pass => self.pass,
            RuleStatus::Fail => self.fail,
            RuleStatus::Warn => self.warn,
            RuleStatus::Error => self.error,
            RuleStatus::Skip => self.skip,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.pass + self.fail + self.warn + self.error + self.skip
    }

    fn merge(&mut self, other: &Self) {
        self.pass += other.pass;
        self.fail += other.fail;
        self.warn += other.warn;
        self.error += other.error;
        self.skip += other.skip;
    }
}

/// Outcome counts for a run, by phase and disposition
///
/// Counts only change through the `add_*` entry points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultCounts {
    phases: BTreeMap<Phase, Tally>,
}

impl ResultCounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every rule outcome of a mutate response
    pub fn add_mutate_response(&mut self, response: &EngineResponse) {
        self.add_all(Phase::Mutate, response);
    }

    /// Count every rule outcome of a generate response
    pub fn add_generate_response(&mut self, response: &EngineResponse) {
        self.add_all(Phase::Generate, response);
    }

    /// Count every rule outcome of a validating admission policy response
    pub fn add_admission_policy_response(&mut self, response: &EngineResponse) {
        self.add_all(Phase::Admission, response);
    }

    /// Count validation outcomes of rule policies and every outcome of CEL policies
    ///
    /// For rule policies only outcomes of validate and verify-images rules count,
    /// and warnings reported by the engine itself are not counted.
    /// A failure is downgraded to a warning when the policy is unscored, or when
    /// `audit_warn` is set and the rule's failure action is `Audit`. Admission
    /// policy responses are skipped since they are counted as they are produced.
    pub fn add_engine_responses(&mut self, audit_warn: bool, responses: &[EngineResponse]) {
        for response in responses {
            match response.policy() {
                PolicyRef::Rule(policy) => self.add_validation(audit_warn, policy, response),
                PolicyRef::Cel(_) => self.add_all(Phase::Cel, response),
                PolicyRef::Admission(_) => {}
            }
        }
    }

    fn add_validation(&mut self, audit_warn: bool, policy: &RulePolicy, response: &EngineResponse) {
        for outcome in response.rules() {
            let Some(rule) = policy.rule(outcome.name()) else {
                continue;
            };
            if (!rule.has_validate() && !rule.has_verify_images()) || outcome.status() == RuleStatus::Warn {
                continue;
            }

            let status = if outcome.status() == RuleStatus::Fail
                && (!policy.is_scored() || (audit_warn && failure_action(policy, rule) == FailureAction::Audit))
            {
                RuleStatus::Warn
            } else {
                outcome.status()
            };
            self.tally_mut(Phase::Validate).record(status);
        }
    }

    fn add_all(&mut self, phase: Phase, response: &EngineResponse) {
        let tally = self.tally_mut(phase);
        for outcome in response.rules() {
            tally.record(outcome.status());
        }
    }

    fn tally_mut(&mut self, phase: Phase) -> &mut Tally {
        self.phases.entry(phase).or_default()
    }

    #[must_use]
    pub fn phase(&self, phase: Phase) -> Tally {
        self.phases.get(&phase).copied().unwrap_or_default()
    }

    /// Counts summed over every phase
    #[must_use]
    pub fn totals(&self) -> Tally {
        let mut totals = Tally::default();
        for tally in self.phases.values() {
            totals.merge(tally);
        }
        totals
    }

    #[must_use]
    pub fn status(&self, status: RuleStatus) -> usize {
        self.totals().get(status)
    }

    pub fn merge(&mut self, other: &Self) {
        for (phase, tally) in &other.phases {
            self.tally_mut(*phase).merge(tally);
        }
    }
}

fn failure_action(policy: &RulePolicy, rule: &Rule) -> FailureAction {
    rule.validate
        .as_ref()
        .and_then(|validate| validate.failure_action)
        .unwrap_or_else(|| policy.failure_action())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RuleResponse, RuleType};
    use crate::resource::Resource;
    use serde_json::json;
    use std::sync::Arc;

    fn rule_policy(failure_action: &str, scored: bool) -> Arc<RulePolicy> {
        let annotations = if scored {
            json!({})
        } else {
            json!({"policies.admitctl.io/scored": "false"})
        };
        Arc::new(
            serde_json::from_value(json!({
                "metadata": {"name": "require-labels", "annotations": annotations},
                "spec": {
                    "validationFailureAction": failure_action,
                    "rules": [
                        {"name": "check-team", "validate": {"message": "team label required"}},
                        {"name": "add-team", "mutate": {"patchStrategicMerge": {"metadata": {"labels": {"team": "a"}}}}}
                    ]
                }
            }))
            .unwrap(),
        )
    }

    fn response(policy: PolicyRef, rules: Vec<RuleResponse>) -> EngineResponse {
        EngineResponse::new(Resource::default(), policy).with_rules(rules)
    }

    fn failing(policy: &Arc<RulePolicy>) -> EngineResponse {
        response(
            PolicyRef::Rule(Arc::clone(policy)),
            vec![
                RuleResponse::fail("check-team", RuleType::Validation, "missing"),
                RuleResponse::pass("add-team", RuleType::Mutation, "patched"),
            ],
        )
    }

    #[test]
    fn test_only_validation_rules_counted() {
        let mut counts = ResultCounts::new();
        counts.add_engine_responses(false, &[failing(&rule_policy("Enforce", true))]);

        assert_eq!(counts.phase(Phase::Validate), Tally { fail: 1, ..Tally::default() });
        assert_eq!(counts.totals().total(), 1);
    }

    #[test]
    fn test_audit_warn_downgrades_failures() {
        let audit = rule_policy("Audit", true);

        let mut counts = ResultCounts::new();
        counts.add_engine_responses(false, &[failing(&audit)]);
        assert_eq!(counts.status(RuleStatus::Fail), 1);

        let mut counts = ResultCounts::new();
        counts.add_engine_responses(true, &[failing(&audit)]);
        assert_eq!(counts.status(RuleStatus::Fail), 0);
        assert_eq!(counts.status(RuleStatus::Warn), 1);

        let mut counts = ResultCounts::new();
        counts.add_engine_responses(true, &[failing(&rule_policy("Enforce", true))]);
        assert_eq!(counts.status(RuleStatus::Fail), 1);
    }

    #[test]
    fn test_engine_warnings_of_rule_policies_not_counted() {
        let policy = rule_policy("Enforce", true);
        let mut counts = ResultCounts::new();
        counts.add_engine_responses(
            false,
            &[response(
                PolicyRef::Rule(policy),
                vec![RuleResponse::warn("check-team", RuleType::Validation, "deprecated field")],
            )],
        );
        assert_eq!(counts.totals().total(), 0);
    }

    #[test]
    fn test_unscored_policy_warns() {
        let mut counts = ResultCounts::new();
        counts.add_engine_responses(false, &[failing(&rule_policy("Enforce", false))]);
        assert_eq!(counts.phase(Phase::Validate), Tally { warn: 1, ..Tally::default() });
    }

    #[test]
    fn test_phase_entry_points() {
        let policy = rule_policy("Enforce", true);
        let mutate = response(
            PolicyRef::Rule(Arc::clone(&policy)),
            vec![RuleResponse::pass("add-team", RuleType::Mutation, "patched")],
        );
        let admission = response(
            PolicyRef::Admission(Arc::default()),
            vec![RuleResponse::fail("binding", RuleType::Validation, "denied")],
        );
        let cel = response(PolicyRef::Cel(Arc::default()), vec![RuleResponse::skip("cel", RuleType::Validation, "excepted")]);

        let mut counts = ResultCounts::new();
        counts.add_mutate_response(&mutate);
        counts.add_generate_response(&response(PolicyRef::Rule(policy), Vec::new()));
        counts.add_admission_policy_response(&admission);
        counts.add_engine_responses(false, &[admission, cel]);

        assert_eq!(counts.phase(Phase::Mutate).pass, 1);
        assert_eq!(counts.phase(Phase::Generate).total(), 0);
        assert_eq!(counts.phase(Phase::Admission).fail, 1);
        assert_eq!(counts.phase(Phase::Cel).skip, 1);
        assert_eq!(counts.totals().total(), 3);
    }
}
