use std::fmt::{self, Display};

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Summary condition folded from every other condition in the ledger.
pub static READY_CONDITION: &str = "Ready";
pub static TEMPLATE_READY_CONDITION: &str = "TemplateReady";
pub static HELM_CHART_READY_CONDITION: &str = "HelmChartReady";
pub static CREDENTIAL_READY_CONDITION: &str = "CredentialReady";
pub static HELM_RELEASE_READY_CONDITION: &str = "HelmReleaseReady";

pub static SUCCEEDED_REASON: &str = "Succeeded";
pub static FAILED_REASON: &str = "Failed";
pub static PROGRESSING_REASON: &str = "Progressing";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    /// Anything that is not literally `True` or `False` counts as in progress.
    pub fn parse(status: &str) -> Self {
        match status {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

impl Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered condition ledger kept in object status, keyed by condition type.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn status_of(&self, type_: &str) -> Option<ConditionStatus> {
        self.get(type_).map(|c| ConditionStatus::parse(&c.status))
    }

    pub fn is_ready(&self, type_: &str) -> bool {
        self.status_of(type_) == Some(ConditionStatus::True)
    }

    /// Upserts a condition. The transition time only moves when the status does.
    pub fn set(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        generation: Option<i64>,
    ) {
        let message = message.into();
        match self.0.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status.as_str() {
                    existing.status = status.as_str().to_string();
                    existing.last_transition_time = Time(Utc::now());
                }
                existing.reason = reason.to_string();
                existing.message = message;
                existing.observed_generation = generation;
            }
            None => self.0.push(Condition {
                type_: type_.to_string(),
                status: status.as_str().to_string(),
                reason: reason.to_string(),
                message,
                observed_generation: generation,
                last_transition_time: Time(Utc::now()),
            }),
        }
    }

    /// Folds every non-summary condition into the `Ready` condition.
    ///
    /// A single `False` wins over any number of `Unknown` conditions; the
    /// messages of all conditions in the winning status are concatenated.
    pub fn summarize(&mut self, generation: Option<i64>) {
        let (mut failed, mut progressing) = (false, false);
        let mut warnings = String::new();
        let mut errors = String::new();

        for condition in self.0.iter().filter(|c| c.type_ != READY_CONDITION) {
            match ConditionStatus::parse(&condition.status) {
                ConditionStatus::True => {}
                ConditionStatus::Unknown => {
                    progressing = true;
                    push_message(&mut warnings, &condition.message)
                }
                ConditionStatus::False => {
                    failed = true;
                    push_message(&mut errors, &condition.message)
                }
            }
        }

        let (status, reason, message) = if failed {
            (ConditionStatus::False, FAILED_REASON, errors)
        } else if progressing {
            (ConditionStatus::Unknown, PROGRESSING_REASON, warnings)
        } else {
            (
                ConditionStatus::True,
                SUCCEEDED_REASON,
                "Object is ready".to_string(),
            )
        };

        self.set(READY_CONDITION, status, reason, message, generation);
    }
}

impl From<Vec<Condition>> for Conditions {
    fn from(conditions: Vec<Condition>) -> Self {
        Self(conditions)
    }
}

fn push_message(acc: &mut String, message: &str) {
    let message = message.trim().trim_end_matches('.');
    if message.is_empty() {
        return;
    }
    if !acc.is_empty() {
        acc.push(' ');
    }
    acc.push_str(message);
    acc.push('.');
}
