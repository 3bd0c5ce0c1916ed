use crate::*;

/// A participant's votes in one poll
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    /// Number of commands applied so far; the next one must carry `nonce + 1`
    pub nonce: u64,

    /// Vote weight per vote option
    pub votes: Vec<u64>,

    pub vote_option_tree_depth: usize,
}

impl Ballot {
    pub fn empty(num_vote_options: usize, vote_option_tree_depth: usize) -> Self {
        Ballot {
            nonce: 0,
            votes: vec![0; num_vote_options],
            vote_option_tree_depth,
        }
    }

    pub fn vote_option_tree(&self) -> Result<IncrementalTree, Error> {
        let mut tree = IncrementalTree::quin(self.vote_option_tree_depth, Fr::from(0u64))?;
        for vote in &self.votes {
            tree.insert(Fr::from(*vote))?;
        }
        Ok(tree)
    }

    pub fn vote_option_root(&self) -> Result<Fr, Error> {
        Ok(self.vote_option_tree()?.root())
    }

    pub fn hash(&self) -> Result<Fr, Error> {
        Ok(hash2(Fr::from(self.nonce), self.vote_option_root()?))
    }
}
