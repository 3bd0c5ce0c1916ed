use crate::*;
use rand_core::{CryptoRng, RngCore};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Created,
    Open,
    Closed,
    Processing,
    Processed,
    Tallied,
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PollStatus::Created => "created",
            PollStatus::Open => "open",
            PollStatus::Closed => "closed",
            PollStatus::Processing => "processing",
            PollStatus::Processed => "processed",
            PollStatus::Tallied => "tallied",
        };
        write!(f, "{}", name)
    }
}

/// A message together with the ephemeral key its sender encrypted it with
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub message: Message,
    pub enc_pub_key: PubKey,
}

/// What one slot of a processing batch did, and the values it started from
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessSlotWitness {
    pub message_index: usize,

    /// `None` for slots past the last published message
    pub command: Option<Command>,
    pub rejection: Option<ValidationError>,

    /// Rejected commands and empty slots target the blank leaf at index 0
    pub state_index: u64,
    pub state_leaf: StateLeaf,
    pub state_leaf_path: MerklePath,
    pub ballot: Ballot,
    pub ballot_path: MerklePath,

    pub vote_option_index: u64,
    pub vote_weight: u64,
    pub vote_weight_path: MerklePath,

    #[serde(with = "serde_field")]
    pub new_vote_option_root: Fr,
}

/// Circuit inputs for one message processing batch
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessBatchInputs {
    pub poll_id: u64,
    pub batch_start_index: usize,
    pub batch_end_index: usize,

    #[serde(with = "serde_field")]
    pub packed_vals: Fr,

    #[serde(with = "serde_field")]
    pub input_hash: Fr,

    #[serde(with = "serde_field")]
    pub coordinator_pub_key_hash: Fr,

    #[serde(with = "serde_field")]
    pub message_root: Fr,
    pub message_subroot_path: SubrootPath,

    /// The batch's messages, with slots past the end repeating the last one
    pub messages: Vec<Message>,
    pub enc_pub_keys: Vec<PubKey>,

    #[serde(with = "serde_field")]
    pub current_state_root: Fr,

    #[serde(with = "serde_field")]
    pub current_ballot_root: Fr,

    #[serde(with = "serde_field")]
    pub new_state_root: Fr,

    #[serde(with = "serde_field")]
    pub new_ballot_root: Fr,

    #[serde(with = "serde_field")]
    pub current_sb_salt: Fr,

    #[serde(with = "serde_field")]
    pub new_sb_salt: Fr,

    /// `hash3(state_root, ballot_root, salt)` before the batch
    #[serde(with = "serde_field")]
    pub current_sb_commitment: Fr,

    #[serde(with = "serde_field")]
    pub new_sb_commitment: Fr,

    pub poll_end_timestamp: u64,

    /// One per message, lowest index first
    pub slots: Vec<ProcessSlotWitness>,
}

/// Running tally and the salts hiding it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TallyResult {
    pub results: Vec<u128>,

    #[serde(with = "serde_field")]
    pub results_salt: Fr,

    pub total_spent: u128,

    #[serde(with = "serde_field")]
    pub spent_salt: Fr,

    pub per_vo_spent: Vec<u128>,

    #[serde(with = "serde_field")]
    pub per_vo_spent_salt: Fr,

    #[serde(with = "serde_field")]
    pub commitment: Fr,
}

impl TallyResult {
    pub fn empty(num_vote_options: usize) -> Self {
        TallyResult {
            results: vec![0; num_vote_options],
            results_salt: Fr::from(0u64),
            total_spent: 0,
            spent_salt: Fr::from(0u64),
            per_vo_spent: vec![0; num_vote_options],
            per_vo_spent_salt: Fr::from(0u64),
            commitment: Fr::from(0u64),
        }
    }

    pub fn compute_commitment(&self, vote_option_tree_depth: usize, mode: VotingMode) -> Result<Fr, Error> {
        let results = hash2(
            value_tree_root(&self.results, vote_option_tree_depth)?,
            self.results_salt,
        );
        let spent = hash2(Fr::from(self.total_spent), self.spent_salt);

        match mode {
            VotingMode::Quadratic => {
                let per_vo_spent = hash2(
                    value_tree_root(&self.per_vo_spent, vote_option_tree_depth)?,
                    self.per_vo_spent_salt,
                );
                Ok(hash3(results, spent, per_vo_spent))
            }
            VotingMode::NonQuadratic => Ok(hash2(results, spent)),
        }
    }
}

/// Check a published tally against its commitment
pub fn verify_tally_result(result: &TallyResult, vote_option_tree_depth: usize, mode: VotingMode) -> bool {
    match result.compute_commitment(vote_option_tree_depth, mode) {
        Ok(commitment) => commitment == result.commitment,
        Err(_) => false,
    }
}

pub(crate) fn value_tree_root(values: &[u128], depth: usize) -> Result<Fr, Error> {
    let mut tree = IncrementalTree::quin(depth, Fr::from(0u64))?;
    for value in values {
        tree.insert(Fr::from(*value))?;
    }
    Ok(tree.root())
}

/// Circuit inputs for one tally batch
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TallyBatchInputs {
    pub poll_id: u64,
    pub batch_start_index: usize,
    pub batch_end_index: usize,

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

    pub ballot_subroot_path: SubrootPath,

    /// Padded with empty ballots up to the batch size
    pub ballots: Vec<Ballot>,

    pub current: TallyResult,
    pub new: TallyResult,
}

/// Copies of everything a processing batch may write
struct WorkingState {
    state_leaves: Vec<StateLeaf>,
    state_tree: IncrementalTree,
    ballots: Vec<Ballot>,
    ballot_tree: IncrementalTree,
    applied_key_changes: Vec<Fr>,
}

enum Transition {
    Vote(VoteCommand),
    KeyChange(KeyChangeAuthorization),
    TopUp(TopUpCommand),
}

/// One voting round
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Poll {
    pub poll_id: u64,
    pub config: PollConfig,
    pub state_tree_depth: usize,
    pub coordinator: Keypair,
    pub vk_refs: VerifyingKeyRefs,
    pub start_time: u64,
    pub end_time: u64,

    status: PollStatus,

    #[serde(with = "serde_field")]
    state_root_on_deploy: Fr,

    state_leaves: Vec<StateLeaf>,
    state_tree: IncrementalTree,
    ballots: Vec<Ballot>,
    ballot_tree: IncrementalTree,

    messages: Vec<PublishedMessage>,
    message_tree: IncrementalTree,

    deactivation_queue: Vec<PublishedMessage>,
    ledger: KeyDeactivationLedger,

    /// Start of the next message batch; batches run from the last one down
    next_batch_start: usize,

    /// Salts the state and ballot roots in the commitment after the last batch
    #[serde(with = "serde_field")]
    sb_salt: Fr,

    /// Ballots tallied so far
    tallied: usize,
    tally: TallyResult,

    subsidy_cursor: SubsidyCursor,
    subsidy: SubsidyResult,
}

impl Poll {
    /// A poll over a snapshot of the registered participants.
    ///
    /// The snapshot must hold the blank leaf at index 0 and match its tree.
    pub(crate) fn new(
        poll_id: u64,
        config: PollConfig,
        state_tree_depth: usize,
        coordinator: Keypair,
        state_leaves: Vec<StateLeaf>,
        state_tree: IncrementalTree,
        now: u64,
    ) -> Result<Self, Error> {
        config.validate(state_tree_depth)?;
        coordinator.pub_key.validate()?;
        if state_leaves.first() != Some(&StateLeaf::blank())
            || state_leaves.len() != state_tree.next_index()
        {
            return Err(Error::ValueOutOfRange(
                "state snapshot must start with the blank leaf and match its tree".to_string(),
            ));
        }

        let depths = config.tree_depths;
        let empty_ballot = Ballot::empty(config.max_values.max_vote_options, depths.vote_option_tree_depth);
        let mut ballot_tree = IncrementalTree::quin(state_tree_depth, empty_ballot.hash()?)?;
        let ballots = vec![empty_ballot; state_leaves.len()];
        for ballot in &ballots {
            ballot_tree.insert(ballot.hash()?)?;
        }

        let padding = PublishedMessage {
            message: Message::padding(),
            enc_pub_key: base_point().into(),
        };
        let mut message_tree = IncrementalTree::quin(depths.message_tree_depth, NOTHING_UP_MY_SLEEVE)?;
        message_tree.insert(padding.message.hash(&padding.enc_pub_key))?;

        Ok(Poll {
            poll_id,
            vk_refs: VerifyingKeyRefs {
                process: config.process_vk_signature(state_tree_depth)?,
                tally: config.tally_vk_signature(state_tree_depth)?,
                subsidy: config.subsidy_vk_signature(state_tree_depth)?,
            },
            config,
            state_tree_depth,
            coordinator,
            start_time: now,
            end_time: now.saturating_add(config.duration),
            status: PollStatus::Created,
            state_root_on_deploy: state_tree.root(),
            state_leaves,
            state_tree,
            ballots,
            ballot_tree,
            messages: vec![padding],
            message_tree,
            deactivation_queue: Vec::new(),
            ledger: KeyDeactivationLedger::new(state_tree_depth)?,
            next_batch_start: 0,
            sb_salt: Fr::from(0u64),
            tallied: 0,
            tally: TallyResult::empty(config.max_values.max_vote_options),
            subsidy_cursor: SubsidyCursor::default(),
            subsidy: SubsidyResult::empty(config.max_values.max_vote_options),
        })
    }

    pub fn status(&self) -> PollStatus {
        self.status
    }

    pub fn state_root_on_deploy(&self) -> Fr {
        self.state_root_on_deploy
    }

    pub fn num_signups(&self) -> usize {
        self.state_leaves.len()
    }

    pub fn state_leaves(&self) -> &[StateLeaf] {
        &self.state_leaves
    }

    pub fn ballots(&self) -> &[Ballot] {
        &self.ballots
    }

    pub fn messages(&self) -> &[PublishedMessage] {
        &self.messages
    }

    pub fn deactivation_queue(&self) -> &[PublishedMessage] {
        &self.deactivation_queue
    }

    pub fn ledger(&self) -> &KeyDeactivationLedger {
        &self.ledger
    }

    pub fn state_root(&self) -> Fr {
        self.state_tree.root()
    }

    pub fn ballot_root(&self) -> Fr {
        self.ballot_tree.root()
    }

    pub fn message_root(&self) -> Fr {
        self.message_tree.root()
    }

    /// Commitment to the current state and ballot roots
    pub fn sb_commitment(&self) -> Fr {
        hash3(self.state_root(), self.ballot_root(), self.sb_salt)
    }

    /// Leaves in the message tree, including the padding added at close
    pub fn message_tree_size(&self) -> usize {
        self.message_tree.next_index()
    }

    pub fn has_unprocessed_messages(&self) -> bool {
        matches!(self.status, PollStatus::Closed | PollStatus::Processing)
    }

    pub fn has_untallied_ballots(&self) -> bool {
        self.status == PollStatus::Processed
    }

    /// The final tally, once every batch has been tallied
    pub fn tally_result(&self) -> Option<&TallyResult> {
        match self.status {
            PollStatus::Tallied => Some(&self.tally),
            _ => None,
        }
    }

    pub fn has_unfinished_subsidy_calculation(&self) -> bool {
        matches!(self.status, PollStatus::Processed | PollStatus::Tallied)
            && !self
                .subsidy_cursor
                .is_finished(self.config.batch_sizes.subsidy_batch_size, self.ballots.len())
    }

    /// The final subsidy, once every block of ballot pairs has been visited
    pub fn subsidy_result(&self) -> Option<&SubsidyResult> {
        match self.status {
            PollStatus::Processed | PollStatus::Tallied
                if !self.has_unfinished_subsidy_calculation() =>
            {
                Some(&self.subsidy)
            }
            _ => None,
        }
    }

    fn expect_status(&self, expected: &'static str, allowed: &[PollStatus]) -> Result<(), Error> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(Error::InvalidPollStatus {
                expected,
                found: self.status,
            })
        }
    }

    pub fn open(&mut self) -> Result<(), Error> {
        self.expect_status("created", &[PollStatus::Created])?;
        self.status = PollStatus::Open;
        info!(poll_id = self.poll_id, end_time = self.end_time, "poll open");
        Ok(())
    }

    pub fn publish_message(&mut self, message: Message, enc_pub_key: PubKey) -> Result<usize, Error> {
        self.expect_status("open", &[PollStatus::Open])?;
        message.validate()?;
        enc_pub_key.validate()?;
        if message.msg_type == CommandType::TopUp {
            return Err(Error::ValueOutOfRange(
                "top-up messages are published with top_up".to_string(),
            ));
        }

        let index = self.append_message(message, enc_pub_key)?;
        debug!(poll_id = self.poll_id, index, "message published");
        Ok(index)
    }

    /// Publish a top-up of `amount` voice credits for `state_index`.
    ///
    /// The index is only checked when the message is processed.
    pub fn top_up(&mut self, state_index: u64, amount: u128) -> Result<usize, Error> {
        self.expect_status("open", &[PollStatus::Open])?;
        let command = TopUpCommand {
            state_index,
            amount,
            poll_id: self.poll_id,
        };

        let index = self.append_message(command.to_message(), *TOP_UP_PAD_KEY)?;
        debug!(poll_id = self.poll_id, index, state_index, "top-up published");
        Ok(index)
    }

    fn append_message(&mut self, message: Message, enc_pub_key: PubKey) -> Result<usize, Error> {
        // index 0 holds the placeholder message
        if self.messages.len() > self.config.max_values.max_messages {
            return Err(Error::CapacityExceeded(self.config.max_values.max_messages));
        }

        let index = self.message_tree.insert(message.hash(&enc_pub_key))?;
        self.messages.push(PublishedMessage { message, enc_pub_key });
        Ok(index)
    }

    pub fn publish_deactivation_message(
        &mut self,
        message: Message,
        enc_pub_key: PubKey,
    ) -> Result<usize, Error> {
        self.expect_status("open", &[PollStatus::Open])?;
        message.validate()?;
        enc_pub_key.validate()?;

        let index = self.deactivation_queue.len();
        self.deactivation_queue.push(PublishedMessage { message, enc_pub_key });
        debug!(poll_id = self.poll_id, index, "deactivation message published");
        Ok(index)
    }

    /// Stop accepting messages and pad the message tree to whole batches
    pub fn close_voting(&mut self, now: u64) -> Result<(), Error> {
        self.expect_status("open", &[PollStatus::Open])?;
        if now < self.end_time {
            return Err(Error::VotingPeriodActive(self.end_time));
        }

        let batch_size = self.config.batch_sizes.message_batch_size;
        let padded = self.message_tree.pad_to_batch(batch_size)?;
        let num_batches = std::cmp::max(1, (self.messages.len() + batch_size - 1) / batch_size);
        self.next_batch_start = (num_batches - 1) * batch_size;
        self.status = PollStatus::Closed;

        info!(
            poll_id = self.poll_id,
            messages = self.messages.len(),
            padded,
            num_batches,
            "voting closed"
        );
        Ok(())
    }

    pub fn process_deactivation_messages<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<DeactivationBatchInputs, Error> {
        self.expect_status("open or closed", &[PollStatus::Open, PollStatus::Closed])?;
        let ctx = DeactivationContext {
            poll_id: self.poll_id,
            coordinator: &self.coordinator,
            state_leaves: &self.state_leaves,
            state_tree: &self.state_tree,
            batch_size: self.config.batch_sizes.message_batch_size,
        };
        self.ledger.process_batch(&self.deactivation_queue, &ctx, rng)
    }

    /// Verify a claim on a deactivated key and authorize its replacement.
    ///
    /// `z` rerandomizes the leaf's status ciphertext.
    pub fn issue_new_key(&mut self, request: &NewKeyRequest, z: &Scalar) -> Result<NewKeyOutcome, Error> {
        self.expect_status("open", &[PollStatus::Open])?;
        if request.poll_id != self.poll_id {
            return Err(Error::PollNotFound(request.poll_id));
        }
        self.ledger.issue_new_key(request, &self.coordinator, z)
    }

    /// Process the next batch of messages, last batch first.
    ///
    /// Rejected commands leave the state untouched and are only recorded in
    /// the witness. Nothing is written unless the whole batch succeeds. The
    /// new state and ballot roots are committed under a fresh salt from `rng`.
    pub fn process_messages<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ProcessBatchInputs, Error> {
        match self.status {
            PollStatus::Closed | PollStatus::Processing => {}
            PollStatus::Processed | PollStatus::Tallied => return Err(Error::NoMoreBatches),
            found => {
                return Err(Error::InvalidPollStatus {
                    expected: "closed",
                    found,
                })
            }
        }

        let batch_size = self.config.batch_sizes.message_batch_size;
        let start = self.next_batch_start;
        let end = std::cmp::min(start + batch_size, self.messages.len());

        let mut work = WorkingState {
            state_leaves: self.state_leaves.clone(),
            state_tree: self.state_tree.clone(),
            ballots: self.ballots.clone(),
            ballot_tree: self.ballot_tree.clone(),
            applied_key_changes: Vec::new(),
        };
        let current_state_root = work.state_tree.root();
        let current_ballot_root = work.ballot_tree.root();

        debug!(poll_id = self.poll_id, start, end, "processing message batch");

        let mut slots = Vec::with_capacity(batch_size);
        for index in (start..start + batch_size).rev() {
            let slot = match self.messages.get(index) {
                Some(published) => self.process_message(index, published, &mut work)?,
                None => self.noop_slot(index, None, None, &work)?,
            };
            slots.push(slot);
        }
        slots.reverse();

        let last = self.messages.len() - 1;
        let (messages, enc_pub_keys): (Vec<Message>, Vec<PubKey>) = (start..start + batch_size)
            .map(|i| {
                let published = &self.messages[std::cmp::min(i, last)];
                (published.message.clone(), published.enc_pub_key)
            })
            .unzip();

        let new_state_root = work.state_tree.root();
        let new_ballot_root = work.ballot_tree.root();
        let current_sb_commitment = hash3(current_state_root, current_ballot_root, self.sb_salt);
        let new_sb_salt = gen_random_salt(rng);
        let new_sb_commitment = hash3(new_state_root, new_ballot_root, new_sb_salt);

        let packed_vals = pack_fields(
            &[
                self.config.max_values.max_vote_options as u64,
                self.num_signups() as u64,
                start as u64,
                end as u64,
            ],
            &[COMMAND_FIELD_BITS; 4],
        )?;
        let coordinator_pub_key_hash = self.coordinator.pub_key.hash();
        let message_root = self.message_tree.root();
        let input_hash = sha256_hash(&[
            packed_vals,
            coordinator_pub_key_hash,
            message_root,
            current_sb_commitment,
            new_sb_commitment,
            Fr::from(self.end_time),
        ]);

        let inputs = ProcessBatchInputs {
            poll_id: self.poll_id,
            batch_start_index: start,
            batch_end_index: end,
            packed_vals,
            input_hash,
            coordinator_pub_key_hash,
            message_root,
            message_subroot_path: self.message_tree.gen_merkle_subroot_path(start, batch_size)?,
            messages,
            enc_pub_keys,
            current_state_root,
            current_ballot_root,
            new_state_root,
            new_ballot_root,
            current_sb_salt: self.sb_salt,
            new_sb_salt,
            current_sb_commitment,
            new_sb_commitment,
            poll_end_timestamp: self.end_time,
            slots,
        };

        self.sb_salt = new_sb_salt;
        self.state_leaves = work.state_leaves;
        self.state_tree = work.state_tree;
        self.ballots = work.ballots;
        self.ballot_tree = work.ballot_tree;
        for nullifier in &work.applied_key_changes {
            self.ledger.mark_applied(nullifier);
        }

        if start == 0 {
            self.status = PollStatus::Processed;
            info!(poll_id = self.poll_id, "all messages processed");
        } else {
            self.status = PollStatus::Processing;
            self.next_batch_start = start - batch_size;
        }
        Ok(inputs)
    }

    fn process_message(
        &self,
        index: usize,
        published: &PublishedMessage,
        work: &mut WorkingState,
    ) -> Result<ProcessSlotWitness, Error> {
        let shared_key = derive_shared_key(&self.coordinator.priv_key, &published.enc_pub_key)?;
        let (command, signature) = Command::decrypt(&published.message, &shared_key);

        let transition = match &command {
            Command::Vote(cmd) => self.validate_vote(cmd, &signature, work).map(Transition::Vote),
            Command::KeyChange(cmd) => self.validate_key_change(cmd, work).map(Transition::KeyChange),
            Command::TopUp(cmd) => self.validate_top_up(cmd, work).map(Transition::TopUp),
        };

        match transition {
            Err(reason) => {
                if index > 0 {
                    warn!(
                        poll_id = self.poll_id,
                        message_index = index,
                        %reason,
                        "command rejected"
                    );
                }
                self.noop_slot(index, Some(command), Some(reason), work)
            }
            Ok(Transition::Vote(cmd)) => self.apply_vote(index, command, &cmd, work),
            Ok(Transition::KeyChange(auth)) => self.apply_key_change(index, command, &auth, work),
            Ok(Transition::TopUp(cmd)) => self.apply_top_up(index, command, &cmd, work),
        }
    }

    fn validate_vote(
        &self,
        cmd: &VoteCommand,
        signature: &Signature,
        work: &WorkingState,
    ) -> Result<VoteCommand, ValidationError> {
        if cmd.state_index == 0 || cmd.state_index >= work.state_leaves.len() as u64 {
            return Err(ValidationError::InvalidStateIndex(cmd.state_index));
        }
        if cmd.is_deactivation() {
            return Err(ValidationError::DeactivationRequest);
        }
        if cmd.poll_id != self.poll_id {
            return Err(ValidationError::PollIdMismatch {
                expected: self.poll_id,
                found: cmd.poll_id,
            });
        }

        let leaf = &work.state_leaves[cmd.state_index as usize];
        let ballot = &work.ballots[cmd.state_index as usize];
        if !cmd.verify_signature(signature, &leaf.pub_key) {
            return Err(ValidationError::InvalidSignature);
        }
        if self.ledger.is_deactivated(cmd.state_index, &leaf.pub_key) {
            return Err(ValidationError::KeyDeactivated(cmd.state_index));
        }
        if cmd.nonce != ballot.nonce + 1 {
            return Err(ValidationError::InvalidNonce {
                expected: ballot.nonce + 1,
                found: cmd.nonce,
            });
        }
        if cmd.new_vote_weight >> self.config.max_vote_weight_bits != 0 {
            return Err(ValidationError::VoteWeightTooLarge(cmd.new_vote_weight));
        }
        if cmd.vote_option_index >= self.config.max_values.max_vote_options as u64 {
            return Err(ValidationError::InvalidVoteOption(cmd.vote_option_index));
        }
        if !cmd.new_pub_key.is_valid() {
            return Err(ValidationError::InvalidNewPublicKey);
        }

        let mode = self.config.mode;
        let previous = ballot.votes[cmd.vote_option_index as usize];
        let available = leaf.voice_credit_balance.saturating_add(mode.cost(previous));
        if mode.cost(cmd.new_vote_weight) > available {
            return Err(ValidationError::InsufficientCredits);
        }
        Ok(*cmd)
    }

    fn validate_key_change(
        &self,
        cmd: &KeyChangeCommand,
        work: &WorkingState,
    ) -> Result<KeyChangeAuthorization, ValidationError> {
        if cmd.poll_id != self.poll_id {
            return Err(ValidationError::PollIdMismatch {
                expected: self.poll_id,
                found: cmd.poll_id,
            });
        }
        let auth = *self
            .ledger
            .authorization(&cmd.nullifier)
            .ok_or(ValidationError::UnknownNullifier)?;
        if auth.applied || work.applied_key_changes.contains(&cmd.nullifier) {
            return Err(ValidationError::KeyChangeAlreadyApplied);
        }
        if auth.new_pub_key != cmd.new_pub_key
            || auth.new_voice_credit_balance != cmd.new_voice_credit_balance
        {
            return Err(ValidationError::KeyChangeMismatch);
        }
        if !cmd.new_pub_key.is_valid() {
            return Err(ValidationError::InvalidNewPublicKey);
        }
        match decrypt_bit(&self.coordinator.priv_key, &cmd.status) {
            Ok(true) => {}
            _ => return Err(ValidationError::InvalidStatus),
        }
        if auth.state_index == 0 || auth.state_index >= work.state_leaves.len() as u64 {
            return Err(ValidationError::InvalidStateIndex(auth.state_index));
        }
        Ok(auth)
    }

    fn validate_top_up(
        &self,
        cmd: &TopUpCommand,
        work: &WorkingState,
    ) -> Result<TopUpCommand, ValidationError> {
        if cmd.state_index == 0 || cmd.state_index >= work.state_leaves.len() as u64 {
            return Err(ValidationError::InvalidStateIndex(cmd.state_index));
        }
        if cmd.poll_id != self.poll_id {
            return Err(ValidationError::PollIdMismatch {
                expected: self.poll_id,
                found: cmd.poll_id,
            });
        }
        work.state_leaves[cmd.state_index as usize]
            .voice_credit_balance
            .checked_add(cmd.amount)
            .ok_or(ValidationError::BalanceOverflow)?;
        Ok(*cmd)
    }

    fn apply_vote(
        &self,
        index: usize,
        command: Command,
        cmd: &VoteCommand,
        work: &mut WorkingState,
    ) -> Result<ProcessSlotWitness, Error> {
        let state_index = cmd.state_index as usize;
        let option = cmd.vote_option_index as usize;
        let leaf = work.state_leaves[state_index];
        let ballot = work.ballots[state_index].clone();
        let vote_option_tree = ballot.vote_option_tree()?;

        let mode = self.config.mode;
        let previous = ballot.votes[option];
        let balance = leaf.voice_credit_balance.saturating_add(mode.cost(previous))
            - mode.cost(cmd.new_vote_weight);

        let new_leaf = StateLeaf::new(cmd.new_pub_key, balance, leaf.timestamp);
        let mut new_ballot = ballot.clone();
        new_ballot.nonce += 1;
        new_ballot.votes[option] = cmd.new_vote_weight;

        let witness = ProcessSlotWitness {
            message_index: index,
            command: Some(command),
            rejection: None,
            state_index: cmd.state_index,
            state_leaf: leaf,
            state_leaf_path: work.state_tree.gen_merkle_path(state_index)?,
            ballot_path: work.ballot_tree.gen_merkle_path(state_index)?,
            vote_option_index: cmd.vote_option_index,
            vote_weight: previous,
            vote_weight_path: vote_option_tree.gen_merkle_path(option)?,
            new_vote_option_root: new_ballot.vote_option_root()?,
            ballot,
        };

        work.state_tree.update(state_index, new_leaf.hash())?;
        work.ballot_tree.update(state_index, new_ballot.hash()?)?;
        work.state_leaves[state_index] = new_leaf;
        work.ballots[state_index] = new_ballot;

        debug!(
            poll_id = self.poll_id,
            message_index = index,
            state_index,
            "vote applied"
        );
        Ok(witness)
    }

    fn apply_key_change(
        &self,
        index: usize,
        command: Command,
        auth: &KeyChangeAuthorization,
        work: &mut WorkingState,
    ) -> Result<ProcessSlotWitness, Error> {
        let state_index = auth.state_index as usize;
        let new_leaf = work.state_leaves[state_index]
            .with_key_and_balance(auth.new_pub_key, auth.new_voice_credit_balance);
        let witness = self.replace_leaf(index, command, state_index, new_leaf, work)?;
        work.applied_key_changes.push(auth.nullifier);

        info!(
            poll_id = self.poll_id,
            message_index = index,
            state_index,
            "key change applied"
        );
        Ok(witness)
    }

    fn apply_top_up(
        &self,
        index: usize,
        command: Command,
        cmd: &TopUpCommand,
        work: &mut WorkingState,
    ) -> Result<ProcessSlotWitness, Error> {
        let state_index = cmd.state_index as usize;
        let leaf = work.state_leaves[state_index];
        let balance = leaf
            .voice_credit_balance
            .checked_add(cmd.amount)
            .ok_or_else(|| Error::ValueOutOfRange("top-up overflows the balance".to_string()))?;
        let new_leaf = leaf.with_key_and_balance(leaf.pub_key, balance);
        let witness = self.replace_leaf(index, command, state_index, new_leaf, work)?;

        debug!(
            poll_id = self.poll_id,
            message_index = index,
            state_index,
            "top-up applied"
        );
        Ok(witness)
    }

    /// Swap in a new state leaf, leaving the ballot as it is
    fn replace_leaf(
        &self,
        index: usize,
        command: Command,
        state_index: usize,
        new_leaf: StateLeaf,
        work: &mut WorkingState,
    ) -> Result<ProcessSlotWitness, Error> {
        let leaf = work.state_leaves[state_index];
        let ballot = work.ballots[state_index].clone();
        let vote_option_tree = ballot.vote_option_tree()?;

        let witness = ProcessSlotWitness {
            message_index: index,
            command: Some(command),
            rejection: None,
            state_index: state_index as u64,
            state_leaf: leaf,
            state_leaf_path: work.state_tree.gen_merkle_path(state_index)?,
            ballot_path: work.ballot_tree.gen_merkle_path(state_index)?,
            vote_option_index: 0,
            vote_weight: ballot.votes.first().copied().unwrap_or(0),
            vote_weight_path: vote_option_tree.gen_merkle_path(0)?,
            new_vote_option_root: vote_option_tree.root(),
            ballot,
        };

        work.state_tree.update(state_index, new_leaf.hash())?;
        work.state_leaves[state_index] = new_leaf;
        Ok(witness)
    }

    /// Witness for a slot that changes nothing: it points at the blank leaf
    fn noop_slot(
        &self,
        index: usize,
        command: Option<Command>,
        rejection: Option<ValidationError>,
        work: &WorkingState,
    ) -> Result<ProcessSlotWitness, Error> {
        let ballot = work.ballots[0].clone();
        let vote_option_tree = ballot.vote_option_tree()?;
        Ok(ProcessSlotWitness {
            message_index: index,
            command,
            rejection,
            state_index: 0,
            state_leaf: work.state_leaves[0],
            state_leaf_path: work.state_tree.gen_merkle_path(0)?,
            ballot_path: work.ballot_tree.gen_merkle_path(0)?,
            vote_option_index: 0,
            vote_weight: ballot.votes.first().copied().unwrap_or(0),
            vote_weight_path: vote_option_tree.gen_merkle_path(0)?,
            new_vote_option_root: vote_option_tree.root(),
            ballot,
        })
    }

    /// Tally the next batch of ballots.
    ///
    /// Every batch draws fresh salts from `rng` for the new commitment.
    pub fn tally_votes<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<TallyBatchInputs, Error> {
        match self.status {
            PollStatus::Processed => {}
            PollStatus::Tallied => return Err(Error::NoMoreBatches),
            found => {
                return Err(Error::InvalidPollStatus {
                    expected: "processed",
                    found,
                })
            }
        }

        let batch_size = self.config.batch_sizes.tally_batch_size;
        let num_signups = self.num_signups();
        let start = self.tallied;
        let end = std::cmp::min(start + batch_size, num_signups);
        let mode = self.config.mode;
        let vote_option_tree_depth = self.config.tree_depths.vote_option_tree_depth;

        let current = self.tally.clone();
        let mut new = current.clone();
        for ballot in &self.ballots[start..end] {
            for (option, weight) in ballot.votes.iter().enumerate() {
                let spent = mode.cost(*weight);
                new.results[option] += *weight as u128;
                new.per_vo_spent[option] += spent;
                new.total_spent += spent;
            }
        }
        new.results_salt = gen_random_salt(rng);
        new.spent_salt = gen_random_salt(rng);
        new.per_vo_spent_salt = gen_random_salt(rng);
        new.commitment = new.compute_commitment(vote_option_tree_depth, mode)?;

        let mut ballots = self.ballots[start..end].to_vec();
        ballots.resize(
            batch_size,
            Ballot::empty(self.config.max_values.max_vote_options, vote_option_tree_depth),
        );

        let packed_vals = pack_fields(
            &[(start / batch_size) as u64, batch_size as u64, num_signups as u64],
            &[COMMAND_FIELD_BITS; 3],
        )?;
        let sb_commitment = self.sb_commitment();

        let inputs = TallyBatchInputs {
            poll_id: self.poll_id,
            batch_start_index: start,
            batch_end_index: end,
            packed_vals,
            input_hash: sha256_hash(&[packed_vals, sb_commitment, current.commitment, new.commitment]),
            state_root: self.state_tree.root(),
            ballot_root: self.ballot_tree.root(),
            sb_salt: self.sb_salt,
            sb_commitment,
            ballot_subroot_path: self.ballot_tree.gen_merkle_subroot_path(start, batch_size)?,
            ballots,
            current,
            new: new.clone(),
        };

        self.tally = new;
        self.tallied = end;
        if end >= num_signups {
            self.status = PollStatus::Tallied;
            info!(poll_id = self.poll_id, num_signups, "tally complete");
        } else {
            debug!(poll_id = self.poll_id, start, end, "tally batch done");
        }
        Ok(inputs)
    }

    /// Run the subsidy over the next block of ballot pairs.
    ///
    /// Available once processing is done, independently of the tally.
    pub fn subsidy_per_batch<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<SubsidyBatchInputs, Error> {
        match self.status {
            PollStatus::Processed | PollStatus::Tallied => {}
            found => {
                return Err(Error::InvalidPollStatus {
                    expected: "processed",
                    found,
                })
            }
        }
        if !self.has_unfinished_subsidy_calculation() {
            return Err(Error::NoMoreBatches);
        }

        let batch_size = self.config.batch_sizes.subsidy_batch_size;
        let num_signups = self.num_signups();
        let vote_option_tree_depth = self.config.tree_depths.vote_option_tree_depth;
        let cursor = self.subsidy_cursor;
        let row_start = cursor.row * batch_size;
        let col_start = cursor.col * batch_size;

        let current = self.subsidy.clone();
        let mut new = current.clone();
        accumulate_subsidy_block(&mut new.subsidy, &self.ballots, row_start, col_start, batch_size)?;
        new.salt = gen_random_salt(rng);
        new.commitment = new.compute_commitment(vote_option_tree_depth)?;

        let empty = Ballot::empty(self.config.max_values.max_vote_options, vote_option_tree_depth);
        let block = |start: usize| {
            let mut ballots: Vec<Ballot> = self.ballots.iter().skip(start).take(batch_size).cloned().collect();
            ballots.resize(batch_size, empty.clone());
            ballots
        };

        let packed_vals = pack_fields(
            &[cursor.col as u64, cursor.row as u64, num_signups as u64],
            &[COMMAND_FIELD_BITS; 3],
        )?;
        let sb_commitment = self.sb_commitment();

        let inputs = SubsidyBatchInputs {
            poll_id: self.poll_id,
            row_batch_index: cursor.row,
            col_batch_index: cursor.col,
            packed_vals,
            input_hash: sha256_hash(&[packed_vals, sb_commitment, current.commitment, new.commitment]),
            state_root: self.state_tree.root(),
            ballot_root: self.ballot_tree.root(),
            sb_salt: self.sb_salt,
            sb_commitment,
            row_ballots: block(row_start),
            col_ballots: block(col_start),
            row_ballot_subroot_path: self.ballot_tree.gen_merkle_subroot_path(row_start, batch_size)?,
            col_ballot_subroot_path: self.ballot_tree.gen_merkle_subroot_path(col_start, batch_size)?,
            current,
            new: new.clone(),
        };

        self.subsidy = new;
        self.subsidy_cursor.advance(batch_size, self.ballots.len());
        if self.has_unfinished_subsidy_calculation() {
            debug!(poll_id = self.poll_id, row = cursor.row, col = cursor.col, "subsidy batch done");
        } else {
            info!(poll_id = self.poll_id, num_signups, "subsidy complete");
        }
        Ok(inputs)
    }
}
