use chrono::Utc;
use tokio::time::Instant;

use crate::models::{Trial, TrialResult};

/// Keeps decimal digits in entry order and drops everything else.
pub fn parse_response(raw: &str) -> Vec<u8> {
    raw.chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| d as u8)
        .collect()
}

/// Scores one submission. Malformed input is never an error, it just scores incorrect.
///
/// Response time is measured from `input_started_at`; without it the time is 0.
pub fn score(
    trial: &Trial,
    trial_index: usize,
    raw: &str,
    input_started_at: Option<Instant>,
    submitted_at: Instant,
) -> TrialResult {
    let user_response = parse_response(raw);
    let is_correct = user_response == trial.correct_answer();
    let response_time = input_started_at
        .map(|started| submitted_at.saturating_duration_since(started).as_millis() as u64)
        .unwrap_or(0);

    TrialResult {
        trial_id: trial.id().to_string(),
        trial_index,
        is_practice: trial.is_practice(),
        trial_kind: trial.kind(),
        digits_shown: trial.digits().to_vec(),
        correct_answer: trial.correct_answer().to_vec(),
        user_response,
        is_correct,
        response_time,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_keeps_only_digits() {
        assert_eq!(parse_response("8-2"), vec![8, 2]);
        assert_eq!(parse_response("ab"), Vec::<u8>::new());
        assert_eq!(parse_response(" 1, 7 4!"), vec![1, 7, 4]);
        assert_eq!(parse_response(""), Vec::<u8>::new());
    }

    #[test]
    fn non_ascii_digits_are_dropped() {
        assert_eq!(parse_response("٣4"), vec![4]);
    }

    #[test]
    fn reversed_input_scores_correct() {
        let trial = Trial::practice("practice1", &[2, 8]);
        let now = Instant::now();
        let result = score(&trial, 0, "8 2", Some(now), now);

        assert!(result.is_correct);
        assert!(result.is_practice);
        assert_eq!(result.user_response, vec![8, 2]);
        assert_eq!(result.correct_answer, vec![8, 2]);
        assert_eq!(result.digits_shown, vec![2, 8]);
        assert_eq!(result.trial_id, "practice1");
    }

    #[test]
    fn forward_order_and_garbage_score_incorrect() {
        let trial = Trial::main("2a", &[5, 2, 9]);
        let now = Instant::now();

        assert!(!score(&trial, 4, "529", Some(now), now).is_correct);
        assert!(!score(&trial, 4, "ab", Some(now), now).is_correct);
        assert!(!score(&trial, 4, "9255", Some(now), now).is_correct);
    }

    #[test]
    fn scoring_is_idempotent() {
        let trial = Trial::main("3b", &[1, 8, 5, 3]);
        let now = Instant::now();
        for raw in ["3581", "3-5-8-1", "1853", "", "35 81x"] {
            let first = score(&trial, 2, raw, Some(now), now).is_correct;
            let second = score(&trial, 2, raw, Some(now), now).is_correct;
            assert_eq!(first, second, "input {:?}", raw);
        }
    }

    #[test]
    fn response_time_counts_from_input_start() {
        let trial = Trial::main("test1", &[3, 4]);
        let started = Instant::now();
        let submitted = started + Duration::from_millis(1350);

        assert_eq!(score(&trial, 2, "43", Some(started), submitted).response_time, 1350);
        assert_eq!(score(&trial, 2, "43", None, submitted).response_time, 0);
    }
}
