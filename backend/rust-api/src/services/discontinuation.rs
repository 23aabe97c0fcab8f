use crate::models::PassFailLedger;

/// Number of same-length main trials that form one pair.
pub const PAIR_SIZE: usize = 2;

/// Stop once both trials of the length just completed have failed.
///
/// Only fires when that length holds exactly one full pair. Test mode never stops.
pub fn should_discontinue(ledger: &PassFailLedger, test_mode: bool, length: usize) -> bool {
    if test_mode {
        return false;
    }

    let outcomes = ledger.outcomes(length);
    outcomes.len() == PAIR_SIZE && outcomes.iter().all(|passed| !passed)
}
