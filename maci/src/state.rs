use crate::*;
use tracing::info;

/// The sign-up registry and every poll deployed over it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MaciState {
    pub config: MaciConfig,
    state_leaves: Vec<StateLeaf>,
    state_tree: IncrementalTree,
    polls: Vec<Poll>,
}

impl MaciState {
    /// An empty registry holding only the blank leaf at index 0
    pub fn new(config: MaciConfig) -> Result<Self, Error> {
        config.validate()?;

        let blank = StateLeaf::blank();
        let mut state_tree = IncrementalTree::quin(config.state_tree_depth, blank.hash())?;
        state_tree.insert(blank.hash())?;

        Ok(MaciState {
            config,
            state_leaves: vec![blank],
            state_tree,
            polls: Vec::new(),
        })
    }

    /// Register a participant and return their state index
    pub fn sign_up(&mut self, pub_key: PubKey, voice_credits: u128, timestamp: u64) -> Result<usize, Error> {
        pub_key.validate()?;

        let leaf = StateLeaf::new(pub_key, voice_credits, timestamp);
        let index = self.state_tree.insert(leaf.hash())?;
        self.state_leaves.push(leaf);

        info!(state_index = index, "signed up");
        Ok(index)
    }

    /// Leaves registered so far, counting the blank leaf
    pub fn num_signups(&self) -> usize {
        self.state_leaves.len()
    }

    pub fn state_leaves(&self) -> &[StateLeaf] {
        &self.state_leaves
    }

    pub fn state_root(&self) -> Fr {
        self.state_tree.root()
    }

    pub fn gen_state_path(&self, state_index: usize) -> Result<MerklePath, Error> {
        self.state_tree.gen_merkle_path(state_index)
    }

    /// Open a poll over the participants registered so far
    pub fn deploy_poll(&mut self, config: PollConfig, coordinator: Keypair, now: u64) -> Result<u64, Error> {
        let poll_id = self.polls.len() as u64;
        let mut poll = Poll::new(
            poll_id,
            config,
            self.config.state_tree_depth,
            coordinator,
            self.state_leaves.clone(),
            self.state_tree.clone(),
            now,
        )?;
        poll.open()?;

        info!(
            poll_id,
            num_signups = self.num_signups(),
            "poll deployed"
        );
        self.polls.push(poll);
        Ok(poll_id)
    }

    pub fn polls(&self) -> &[Poll] {
        &self.polls
    }

    pub fn poll(&self, poll_id: u64) -> Result<&Poll, Error> {
        self.polls
            .get(poll_id as usize)
            .ok_or(Error::PollNotFound(poll_id))
    }

    pub fn poll_mut(&mut self, poll_id: u64) -> Result<&mut Poll, Error> {
        self.polls
            .get_mut(poll_id as usize)
            .ok_or(Error::PollNotFound(poll_id))
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Pack into CBOR
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_cbor::to_vec(self)?)
    }

    /// Unpack a snapshot, either JSON or CBOR
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        match bytes.first() {
            // If it starts with `{` then it's JSON
            Some(b'{') => Ok(serde_json::from_slice(bytes)?),
            Some(_) => Ok(serde_cbor::from_slice(bytes)?),
            None => Err(Error::DeserializationUnknownFormat),
        }
    }
}
