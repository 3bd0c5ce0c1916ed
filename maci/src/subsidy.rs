//! Pairwise subsidy for quadratic funding.
//!
//! Every pair of ballots `i < j` adds `2 * k_ij * v_ip * v_jp` to option `p`,
//! where `k_ij = M * 10^W / (M + sum_p v_ip * v_jp)`. Pairs that vote alike
//! get a smaller coefficient, which blunts collusion between them.
//!
//! Ballots are walked in square blocks of `subsidy_batch_size`. Only blocks on
//! or above the diagonal are visited, and inside a diagonal block only pairs
//! with `i < j` count.

use crate::*;

/// `M`: damping constant of the pair coefficient
pub const SUBSIDY_DAMPING: u128 = 50;

/// `W`: decimal digits of fixed-point precision in the pair coefficient
pub const SUBSIDY_PRECISION_DIGITS: u32 = 4;

/// Block of ballot pairs handled by the next subsidy batch, as batch indices
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubsidyCursor {
    pub row: usize,
    pub col: usize,
}

impl SubsidyCursor {
    pub fn is_finished(&self, batch_size: usize, num_ballots: usize) -> bool {
        self.row * batch_size >= num_ballots || self.col * batch_size >= num_ballots
    }

    /// Move along the row, then down to the next diagonal block
    pub fn advance(&mut self, batch_size: usize, num_ballots: usize) {
        if self.col * batch_size + batch_size < num_ballots {
            self.col += 1;
        } else {
            self.row += 1;
            self.col = self.row;
        }
    }
}

/// Running subsidy per vote option and the salt hiding it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubsidyResult {
    pub subsidy: Vec<u128>,

    #[serde(with = "serde_field")]
    pub salt: Fr,

    #[serde(with = "serde_field")]
    pub commitment: Fr,
}

impl SubsidyResult {
    pub fn empty(num_vote_options: usize) -> Self {
        SubsidyResult {
            subsidy: vec![0; num_vote_options],
            salt: Fr::from(0u64),
            commitment: Fr::from(0u64),
        }
    }

    /// `hash2(root of the subsidy values, salt)`
    pub fn compute_commitment(&self, vote_option_tree_depth: usize) -> Result<Fr, Error> {
        Ok(hash2(
            value_tree_root(&self.subsidy, vote_option_tree_depth)?,
            self.salt,
        ))
    }
}

/// Check a published subsidy against its commitment
pub fn verify_subsidy_result(result: &SubsidyResult, vote_option_tree_depth: usize) -> bool {
    match result.compute_commitment(vote_option_tree_depth) {
        Ok(commitment) => commitment == result.commitment,
        Err(_) => false,
    }
}

/// `k_ij`, truncated to an integer
pub fn subsidy_coefficient(row: &Ballot, col: &Ballot) -> Result<u128, Error> {
    let mut overlap: u128 = 0;
    for (a, b) in row.votes.iter().zip(col.votes.iter()) {
        overlap = (*a as u128)
            .checked_mul(*b as u128)
            .and_then(|product| overlap.checked_add(product))
            .ok_or_else(|| Error::ValueOutOfRange("subsidy vote overlap overflows".to_string()))?;
    }
    let scale = SUBSIDY_DAMPING * 10u128.pow(SUBSIDY_PRECISION_DIGITS);
    let denominator = SUBSIDY_DAMPING
        .checked_add(overlap)
        .ok_or_else(|| Error::ValueOutOfRange("subsidy vote overlap overflows".to_string()))?;
    Ok(scale / denominator)
}

/// Add the pairs of one block to `subsidy`.
///
/// Indices past the last ballot stand for empty ballots, which add nothing.
pub(crate) fn accumulate_subsidy_block(
    subsidy: &mut [u128],
    ballots: &[Ballot],
    row_start: usize,
    col_start: usize,
    batch_size: usize,
) -> Result<(), Error> {
    let overflow = || Error::ValueOutOfRange("subsidy overflows".to_string());

    for i in 0..batch_size {
        for j in 0..batch_size {
            if row_start == col_start && i >= j {
                continue;
            }
            let (row, col) = match (ballots.get(row_start + i), ballots.get(col_start + j)) {
                (Some(row), Some(col)) => (row, col),
                _ => continue,
            };

            let k = subsidy_coefficient(row, col)?;
            for (p, total) in subsidy.iter_mut().enumerate() {
                let v_i = row.votes.get(p).copied().unwrap_or(0) as u128;
                let v_j = col.votes.get(p).copied().unwrap_or(0) as u128;
                let share = k
                    .checked_mul(2)
                    .and_then(|x| x.checked_mul(v_i))
                    .and_then(|x| x.checked_mul(v_j))
                    .ok_or_else(overflow)?;
                *total = total.checked_add(share).ok_or_else(overflow)?;
            }
        }
    }
    Ok(())
}

/// Circuit inputs for one subsidy batch
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubsidyBatchInputs {
    pub poll_id: u64,
    pub row_batch_index: usize,
    pub col_batch_index: usize,

    #[serde(with = "serde_field")]
    pub packed_vals: Fr,

    #[serde(with = "serde_field")]
    pub input_hash: Fr,

    #[serde(with = "serde_field")]
    pub state_root: Fr,

    #[serde(with = "serde_field")]
    pub ballot_root: Fr,

    #[serde(with = "serde_field")]
    pub sb_salt: Fr,

    #[serde(with = "serde_field")]
    pub sb_commitment: Fr,

    /// Ballots of the row and column blocks, padded with empty ballots
    pub row_ballots: Vec<Ballot>,
    pub col_ballots: Vec<Ballot>,
    pub row_ballot_subroot_path: SubrootPath,
    pub col_ballot_subroot_path: SubrootPath,

    pub current: SubsidyResult,
    pub new: SubsidyResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(votes: Vec<u64>) -> Ballot {
        let mut ballot = Ballot::empty(votes.len(), 1);
        ballot.votes = votes;
        ballot
    }

    #[test]
    fn test_coefficient() {
        // 500000 / (50 + 2*3)
        assert_eq!(
            subsidy_coefficient(&ballot(vec![2, 0]), &ballot(vec![3, 4])).unwrap(),
            8928
        );
        assert_eq!(
            subsidy_coefficient(&ballot(vec![0, 0]), &ballot(vec![3, 4])).unwrap(),
            10_000
        );
    }

    #[test]
    fn test_diagonal_block_counts_each_pair_once() {
        let ballots = vec![ballot(vec![1]), ballot(vec![2])];
        let mut subsidy = vec![0];
        accumulate_subsidy_block(&mut subsidy, &ballots, 0, 0, 5).unwrap();
        // k = 500000 / 52 = 9615
        assert_eq!(subsidy, vec![2 * 9615 * 2]);

        let mut off_diagonal = vec![0];
        accumulate_subsidy_block(&mut off_diagonal, &ballots, 0, 5, 5).unwrap();
        assert_eq!(off_diagonal, vec![0]);
    }

    #[test]
    fn test_cursor_walks_upper_triangle() {
        let mut cursor = SubsidyCursor::default();
        let mut blocks = Vec::new();
        while !cursor.is_finished(5, 12) {
            blocks.push((cursor.row, cursor.col));
            cursor.advance(5, 12);
        }
        assert_eq!(
            blocks,
            vec![(0, 0), (0, 1), (0, 2), (1, 1), (1, 2), (2, 2)]
        );
    }

    #[test]
    fn test_commitment_verifies() {
        let mut result = SubsidyResult::empty(3);
        result.subsidy = vec![7, 0, 2];
        result.salt = Fr::from(99u64);
        result.commitment = result.compute_commitment(1).unwrap();
        assert!(verify_subsidy_result(&result, 1));

        result.subsidy[0] = 8;
        assert!(!verify_subsidy_result(&result, 1));
    }
}
