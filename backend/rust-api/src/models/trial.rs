use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role a trial plays inside one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrialKind {
    /// Immediate feedback, never scored.
    Practice,
    /// Scored, but kept out of the pass/fail ledger.
    Training,
    #[default]
    Main,
}

impl TrialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialKind::Practice => "practice",
            TrialKind::Training => "training",
            TrialKind::Main => "main",
        }
    }
}

/// One stimulus sequence. The expected answer is the digit reversal and is fixed at
/// construction time, so the fields stay private.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    id: String,
    digits: Vec<u8>,
    correct_answer: Vec<u8>,
    kind: TrialKind,
}

impl Trial {
    pub fn new(id: impl Into<String>, digits: Vec<u8>, kind: TrialKind) -> Self {
        let correct_answer = digits.iter().rev().copied().collect();
        Self {
            id: id.into(),
            digits,
            correct_answer,
            kind,
        }
    }

    pub fn practice(id: impl Into<String>, digits: &[u8]) -> Self {
        Self::new(id, digits.to_vec(), TrialKind::Practice)
    }

    pub fn training(id: impl Into<String>, digits: &[u8]) -> Self {
        Self::new(id, digits.to_vec(), TrialKind::Training)
    }

    pub fn main(id: impl Into<String>, digits: &[u8]) -> Self {
        Self::new(id, digits.to_vec(), TrialKind::Main)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn digits(&self) -> &[u8] {
        &self.digits
    }

    pub fn correct_answer(&self) -> &[u8] {
        &self.correct_answer
    }

    pub fn kind(&self) -> TrialKind {
        self.kind
    }

    pub fn is_practice(&self) -> bool {
        self.kind == TrialKind::Practice
    }

    /// Number of digits shown, which is also the ledger key.
    pub fn span(&self) -> usize {
        self.digits.len()
    }
}

/// One scored attempt, created once per submitted response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    pub trial_id: String,
    pub trial_index: usize,
    pub is_practice: bool,
    #[serde(default)]
    pub trial_kind: TrialKind,
    pub digits_shown: Vec<u8>,
    pub correct_answer: Vec<u8>,
    pub user_response: Vec<u8>,
    pub is_correct: bool,
    /// Milliseconds from the start of the input phase to the submission.
    pub response_time: u64,
    pub timestamp: DateTime<Utc>,
}

type LedgerRepr = BTreeMap<String, Vec<bool>>;

/// Pass/fail history per sequence length, main trials only.
///
/// Updates never touch the receiver: [`PassFailLedger::record`] returns the next ledger value.
/// Serialized as an object keyed by the length as a string (`{"3": [true, false]}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "LedgerRepr", try_from = "LedgerRepr")]
pub struct PassFailLedger {
    entries: BTreeMap<usize, Vec<bool>>,
}

impl PassFailLedger {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn record(&self, length: usize, passed: bool) -> Self {
        let mut entries = self.entries.clone();
        entries.entry(length).or_default().push(passed);
        Self { entries }
    }

    /// Appends every outcome of `other` after the outcomes already held for the same length.
    #[must_use]
    pub fn merge(&self, other: &PassFailLedger) -> Self {
        let mut entries = self.entries.clone();
        for (length, outcomes) in &other.entries {
            entries
                .entry(*length)
                .or_default()
                .extend(outcomes.iter().copied());
        }
        Self { entries }
    }

    pub fn outcomes(&self, length: usize) -> &[bool] {
        self.entries
            .get(&length)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<PassFailLedger> for LedgerRepr {
    fn from(ledger: PassFailLedger) -> Self {
        ledger
            .entries
            .into_iter()
            .map(|(length, outcomes)| (length.to_string(), outcomes))
            .collect()
    }
}

impl TryFrom<LedgerRepr> for PassFailLedger {
    type Error = std::num::ParseIntError;

    fn try_from(repr: LedgerRepr) -> Result<Self, Self::Error> {
        let entries = repr
            .into_iter()
            .map(|(key, outcomes)| Ok((key.trim().parse::<usize>()?, outcomes)))
            .collect::<Result<BTreeMap<_, _>, Self::Error>>()?;
        Ok(Self { entries })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    #[default]
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

/// States of one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskPhase {
    Instructions,
    Displaying,
    Input,
    PracticeFeedback,
    Complete,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Instructions => "instructions",
            TaskPhase::Displaying => "displaying",
            TaskPhase::Input => "input",
            TaskPhase::PracticeFeedback => "practice-feedback",
            TaskPhase::Complete => "complete",
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const TASK_TYPE_BACKWARD: &str = "digit-span-backward";

/// Final aggregate of one task instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub total_trials: u32,
    pub correct_trials: u32,
    pub accuracy: f64,
    pub direction: Direction,
    pub trial_results: Vec<TrialResult>,
    pub pass_fail_map: PassFailLedger,
    #[serde(default)]
    pub discontinued: bool,
    pub timestamp: DateTime<Utc>,
    pub task_type: String,
}

impl TaskResult {
    /// Practice attempts stay in `trial_results` but are left out of the totals.
    pub fn summarize(
        trial_results: Vec<TrialResult>,
        pass_fail_map: PassFailLedger,
        discontinued: bool,
    ) -> Self {
        let scored = trial_results.iter().filter(|r| !r.is_practice);
        let (total_trials, correct_trials) = scored.fold((0u32, 0u32), |(total, correct), r| {
            (total + 1, correct + u32::from(r.is_correct))
        });

        Self {
            total_trials,
            correct_trials,
            accuracy: accuracy_percent(correct_trials, total_trials),
            direction: Direction::Backward,
            trial_results,
            pass_fail_map,
            discontinued,
            timestamp: Utc::now(),
            task_type: TASK_TYPE_BACKWARD.to_string(),
        }
    }
}

/// Percentage rounded to one decimal place, 0 when nothing was scored.
pub fn accuracy_percent(correct: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = f64::from(correct) / f64::from(total) * 100.0;
    (raw * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(index: usize, kind: TrialKind, correct: bool) -> TrialResult {
        TrialResult {
            trial_id: format!("t{}", index),
            trial_index: index,
            is_practice: kind == TrialKind::Practice,
            trial_kind: kind,
            digits_shown: vec![1, 2],
            correct_answer: vec![2, 1],
            user_response: if correct { vec![2, 1] } else { vec![] },
            is_correct: correct,
            response_time: 900,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn trial_correct_answer_is_reversed_digits() {
        let trial = Trial::main("3a", &[9, 4, 7, 2]);
        assert_eq!(trial.correct_answer(), &[2, 7, 4, 9]);
        assert_eq!(trial.span(), 4);
        assert!(!trial.is_practice());
    }

    #[test]
    fn accuracy_rounds_to_one_decimal() {
        assert_eq!(accuracy_percent(7, 10), 70.0);
        assert_eq!(accuracy_percent(0, 0), 0.0);
        assert_eq!(accuracy_percent(2, 3), 66.7);
        assert_eq!(accuracy_percent(1, 3), 33.3);
    }

    #[test]
    fn ledger_record_leaves_previous_value_untouched() {
        let empty = PassFailLedger::new();
        let one = empty.record(3, false);
        let two = one.record(3, true);

        assert!(empty.is_empty());
        assert_eq!(one.outcomes(3), &[false]);
        assert_eq!(two.outcomes(3), &[false, true]);
        assert!(two.outcomes(4).is_empty());
    }

    #[test]
    fn ledger_merge_appends_per_length() {
        let first = PassFailLedger::new().record(3, true).record(4, false);
        let second = PassFailLedger::new().record(3, false).record(5, true);

        let merged = first.merge(&second);
        assert_eq!(merged.outcomes(3), &[true, false]);
        assert_eq!(merged.outcomes(4), &[false]);
        assert_eq!(merged.outcomes(5), &[true]);
        assert_eq!(merged.lengths().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn ledger_serializes_with_string_keys() {
        let ledger = PassFailLedger::new().record(3, true).record(3, false);
        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(json, serde_json::json!({ "3": [true, false] }));

        let back: PassFailLedger = serde_json::from_value(json).unwrap();
        assert_eq!(back, ledger);
    }

    #[test]
    fn ledger_rejects_non_numeric_keys() {
        let parsed: Result<PassFailLedger, _> =
            serde_json::from_value(serde_json::json!({ "three": [true] }));
        assert!(parsed.is_err());
    }

    #[test]
    fn summarize_skips_practice_in_totals() {
        let results = vec![
            result(0, TrialKind::Practice, false),
            result(1, TrialKind::Practice, true),
            result(2, TrialKind::Training, true),
            result(3, TrialKind::Main, false),
        ];

        let summary = TaskResult::summarize(results, PassFailLedger::new(), false);
        assert_eq!(summary.total_trials, 2);
        assert_eq!(summary.correct_trials, 1);
        assert_eq!(summary.accuracy, 50.0);
        assert_eq!(summary.trial_results.len(), 4);
        assert_eq!(summary.direction, Direction::Backward);
        assert_eq!(summary.task_type, TASK_TYPE_BACKWARD);
    }

    #[test]
    fn task_phase_uses_kebab_case() {
        assert_eq!(
            serde_json::to_value(TaskPhase::PracticeFeedback).unwrap(),
            "practice-feedback"
        );
        assert_eq!(TaskPhase::Input.to_string(), "input");
    }
}
