//! Stimulus lists for one task instance.
//!
//! Every series administers three length pairs (3, 4, 5). Each pair holds the series' own fixed
//! sequence and a random filler matched to the length of the other series' sequence. Series A
//! presents fixed-then-random, series B random-then-fixed.

use rand::Rng;

use crate::models::{Series, Trial, TrialKind};

struct FixedSequence {
    id: &'static str,
    digits: &'static [u8],
}

const PRACTICE: [FixedSequence; 2] = [
    FixedSequence {
        id: "practice1",
        digits: &[2, 8],
    },
    FixedSequence {
        id: "practice2",
        digits: &[4, 7, 1],
    },
];

const TRAINING: [FixedSequence; 2] = [
    FixedSequence {
        id: "1a",
        digits: &[3, 4],
    },
    FixedSequence {
        id: "1b",
        digits: &[7, 1],
    },
];

const TEST_MODE: [FixedSequence; 3] = [
    FixedSequence {
        id: "test1",
        digits: &[3, 4],
    },
    FixedSequence {
        id: "test2",
        digits: &[5, 2, 9],
    },
    FixedSequence {
        id: "test3",
        digits: &[7, 1, 8],
    },
];

const SERIES_A: [FixedSequence; 3] = [
    FixedSequence {
        id: "2a",
        digits: &[5, 2, 9],
    },
    FixedSequence {
        id: "3a",
        digits: &[9, 4, 7, 2],
    },
    FixedSequence {
        id: "4a",
        digits: &[2, 9, 6, 4, 7],
    },
];

const SERIES_B: [FixedSequence; 3] = [
    FixedSequence {
        id: "2b",
        digits: &[6, 1, 3],
    },
    FixedSequence {
        id: "3b",
        digits: &[1, 8, 5, 3],
    },
    FixedSequence {
        id: "4b",
        digits: &[5, 1, 8, 3, 9],
    },
];

const DIGIT_POOL: std::ops::RangeInclusive<u8> = 0..=9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRequest {
    pub series: Series,
    pub test_mode: bool,
    pub is_first_task: bool,
}

/// Builds the ordered trial list: practice (first task only), training (first task, full mode),
/// then the main block.
pub fn generate_trials<R: Rng + ?Sized>(request: &SequenceRequest, rng: &mut R) -> Vec<Trial> {
    let mut trials = Vec::with_capacity(10);

    if request.is_first_task {
        trials.extend(PRACTICE.iter().map(|seq| Trial::practice(seq.id, seq.digits)));
    }

    if request.test_mode {
        trials.extend(TEST_MODE.iter().map(|seq| Trial::main(seq.id, seq.digits)));
        return trials;
    }

    if request.is_first_task {
        trials.extend(TRAINING.iter().map(|seq| Trial::training(seq.id, seq.digits)));
    }

    for (own_a, own_b) in SERIES_A.iter().zip(SERIES_B.iter()) {
        match request.series {
            Series::SeriesA => {
                trials.push(Trial::main(own_a.id, own_a.digits));
                trials.push(random_filler(own_b, rng));
            }
            Series::SeriesB => {
                trials.push(random_filler(own_a, rng));
                trials.push(Trial::main(own_b.id, own_b.digits));
            }
        }
    }

    trials
}

fn random_filler<R: Rng + ?Sized>(basis: &FixedSequence, rng: &mut R) -> Trial {
    let digits = random_digits(basis.digits.len(), rng);
    Trial::new(format!("{}_random", basis.id), digits, TrialKind::Main)
}

/// Draws digits without replacement, refilling the pool whenever it runs dry.
pub fn random_digits<R: Rng + ?Sized>(length: usize, rng: &mut R) -> Vec<u8> {
    let mut pool: Vec<u8> = Vec::with_capacity(10);
    let mut digits = Vec::with_capacity(length);

    for _ in 0..length {
        if pool.is_empty() {
            pool.extend(DIGIT_POOL);
        }
        let index = rng.random_range(0..pool.len());
        digits.push(pool.swap_remove(index));
    }

    digits
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    fn request(series: Series, test_mode: bool, is_first_task: bool) -> SequenceRequest {
        SequenceRequest {
            series,
            test_mode,
            is_first_task,
        }
    }

    fn ids(trials: &[Trial]) -> Vec<&str> {
        trials.iter().map(Trial::id).collect()
    }

    #[test]
    fn test_mode_first_task_has_two_practice_and_three_main() {
        let mut rng = StdRng::seed_from_u64(1);
        let trials = generate_trials(&request(Series::SeriesA, true, true), &mut rng);

        assert_eq!(
            ids(&trials),
            vec!["practice1", "practice2", "test1", "test2", "test3"]
        );
        assert!(trials[..2].iter().all(Trial::is_practice));
        assert!(trials[2..].iter().all(|t| t.kind() == TrialKind::Main));
        assert_eq!(
            trials.iter().map(Trial::span).collect::<Vec<_>>(),
            vec![2, 3, 2, 3, 3]
        );
    }

    #[test]
    fn later_test_mode_task_skips_practice() {
        let mut rng = StdRng::seed_from_u64(2);
        let trials = generate_trials(&request(Series::SeriesB, true, false), &mut rng);
        assert_eq!(ids(&trials), vec!["test1", "test2", "test3"]);
    }

    #[test]
    fn full_mode_series_a_is_fixed_then_random() {
        let mut rng = StdRng::seed_from_u64(3);
        let trials = generate_trials(&request(Series::SeriesA, false, true), &mut rng);

        assert_eq!(
            ids(&trials),
            vec![
                "practice1",
                "practice2",
                "1a",
                "1b",
                "2a",
                "2b_random",
                "3a",
                "3b_random",
                "4a",
                "4b_random"
            ]
        );
        assert_eq!(trials[2].kind(), TrialKind::Training);
        assert_eq!(trials[3].kind(), TrialKind::Training);
        assert_eq!(trials[4].digits(), &[5, 2, 9]);
    }

    #[test]
    fn full_mode_series_b_is_random_then_fixed() {
        let mut rng = StdRng::seed_from_u64(4);
        let trials = generate_trials(&request(Series::SeriesB, false, false), &mut rng);

        assert_eq!(
            ids(&trials),
            vec!["2a_random", "2b", "3a_random", "3b", "4a_random", "4b"]
        );
        assert_eq!(
            trials.iter().map(Trial::span).collect::<Vec<_>>(),
            vec![3, 3, 4, 4, 5, 5]
        );
        assert_eq!(trials[5].digits(), &[5, 1, 8, 3, 9]);
    }

    #[test]
    fn every_trial_answer_is_the_reversal() {
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            for series in [Series::SeriesA, Series::SeriesB] {
                for (test_mode, first) in [(false, true), (false, false), (true, true)] {
                    let trials = generate_trials(&request(series, test_mode, first), &mut rng);
                    for trial in &trials {
                        let reversed: Vec<u8> = trial.digits().iter().rev().copied().collect();
                        assert_eq!(trial.correct_answer(), reversed.as_slice());
                    }
                }
            }
        }
    }

    #[test]
    fn random_fillers_match_pair_length_without_repeats() {
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let trials = generate_trials(&request(Series::SeriesA, false, false), &mut rng);

            for pair in trials.chunks(2) {
                let (fixed, filler) = (&pair[0], &pair[1]);
                assert!(filler.id().ends_with("_random"));
                assert_eq!(fixed.span(), filler.span());

                let unique: HashSet<u8> = filler.digits().iter().copied().collect();
                assert_eq!(unique.len(), filler.span());
                assert!(filler.digits().iter().all(|d| *d <= 9));
            }
        }
    }

    #[test]
    fn random_digits_refills_pool_past_ten() {
        let mut rng = StdRng::seed_from_u64(5);
        let digits = random_digits(15, &mut rng);
        assert_eq!(digits.len(), 15);

        let first_ten: HashSet<u8> = digits[..10].iter().copied().collect();
        assert_eq!(first_ten.len(), 10);
    }
}
