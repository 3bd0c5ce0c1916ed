//! Key deactivation and re-keying.
//!
//! A participant asks for their key to be deactivated by publishing a vote
//! command carrying the zero public key. The coordinator processes these
//! requests in batches, folding every published message into a chain hash
//! and recording each accepted request as a leaf of the deactivated-keys
//! tree. The leaf holds an ElGamal encryption of status 1 under the
//! coordinator's key, so nobody but the coordinator can tell accepted and
//! rejected requests apart.
//!
//! Later the participant proves knowledge of the deactivated private key
//! with a nullifier and gets a new key bound to their state index.

use crate::*;
use rand_core::{CryptoRng, RngCore};
use tracing::{debug, info, warn};

/// Leaf of the deactivated-keys tree
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeactivatedKeyLeaf {
    pub pub_key: PubKey,
    pub status: ElGamalCiphertext,

    #[serde(with = "serde_field")]
    pub salt: Fr,
}

impl DeactivatedKeyLeaf {
    pub fn as_array(&self) -> [Fr; 7] {
        let [c1x, c1y, c2x, c2y] = self.status.as_array();
        [
            self.pub_key.x(),
            self.pub_key.y(),
            c1x,
            c1y,
            c2x,
            c2y,
            self.salt,
        ]
    }

    pub fn hash(&self) -> Fr {
        hash_n(&self.as_array())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeactivationRecord {
    pub leaf: DeactivatedKeyLeaf,
    pub state_index: u64,
    pub balance_at_deactivation: u128,
}

/// A new key the coordinator agreed to bind, waiting for its key change message
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChangeAuthorization {
    #[serde(with = "serde_field")]
    pub nullifier: Fr,

    pub state_index: u64,
    pub new_pub_key: PubKey,
    pub new_voice_credit_balance: u128,
    pub applied: bool,
}

/// Proves knowledge of a deactivated key without revealing it
pub fn nullifier(priv_key: &PrivKey, salt: Fr) -> Fr {
    hash2(scalar_to_fr(&priv_key.formatted()), salt)
}

/// A participant's claim on a deactivated leaf
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewKeyRequest {
    pub old_priv_key: PrivKey,
    pub leaf_index: usize,

    #[serde(with = "serde_field")]
    pub salt: Fr,

    /// Inclusion proof of the deactivated leaf
    pub path: MerklePath,

    pub new_pub_key: PubKey,
    pub new_voice_credit_balance: u128,
    pub poll_id: u64,
}

/// Result of new-key issuance, also the witness of the issuance circuit
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewKeyOutcome {
    pub is_valid_status: bool,

    #[serde(with = "serde_field")]
    pub nullifier: Fr,

    pub state_index: u64,

    #[serde(with = "serde_field")]
    pub deactivated_keys_root: Fr,

    pub original_status: ElGamalCiphertext,

    #[serde(with = "serde_field::scalar")]
    pub z: Scalar,

    /// The command the participant encrypts and publishes to apply the change
    pub command: KeyChangeCommand,
}

/// One slot of a deactivation batch
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeactivationSlotWitness {
    pub message: Message,
    pub enc_pub_key: PubKey,
    pub is_padding: bool,
    pub command: Option<Command>,
    pub rejection: Option<ValidationError>,

    /// Index 0 when the command does not name a usable state index
    pub state_index: u64,
    pub state_leaf: StateLeaf,
    pub state_leaf_path: MerklePath,

    pub status: ElGamalCiphertext,

    #[serde(with = "serde_field::scalar")]
    pub mask: Scalar,

    pub deactivated_leaf_index: Option<usize>,

    /// Chain hash after this slot
    #[serde(with = "serde_field")]
    pub chain_hash: Fr,
}

/// Circuit inputs for one batch of deactivation requests
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeactivationBatchInputs {
    pub poll_id: u64,
    pub batch_start_index: usize,
    pub batch_size: usize,
    pub num_real_messages: usize,
    pub coordinator_pub_key: PubKey,

    #[serde(with = "serde_field")]
    pub state_root: Fr,

    #[serde(with = "serde_field")]
    pub current_chain_hash: Fr,

    #[serde(with = "serde_field")]
    pub new_message_chain_hash: Fr,

    #[serde(with = "serde_field")]
    pub current_deactivated_root: Fr,

    #[serde(with = "serde_field")]
    pub new_deactivated_root: Fr,

    pub slots: Vec<DeactivationSlotWitness>,
}

/// What a deactivation batch needs to know about its poll
pub(crate) struct DeactivationContext<'a> {
    pub poll_id: u64,
    pub coordinator: &'a Keypair,
    pub state_leaves: &'a [StateLeaf],
    pub state_tree: &'a IncrementalTree,
    pub batch_size: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KeyDeactivationLedger {
    tree: IncrementalTree,
    records: Vec<DeactivationRecord>,

    #[serde(with = "serde_field")]
    chain_hash: Fr,

    #[serde(with = "serde_field::vec")]
    consumed_nullifiers: Vec<Fr>,

    authorizations: Vec<KeyChangeAuthorization>,

    /// Queue position of the next deactivation message to process
    processed_messages: usize,
}

impl KeyDeactivationLedger {
    pub fn new(depth: usize) -> Result<Self, Error> {
        Ok(KeyDeactivationLedger {
            tree: IncrementalTree::quin(depth, NOTHING_UP_MY_SLEEVE)?,
            records: Vec::new(),
            chain_hash: NOTHING_UP_MY_SLEEVE,
            consumed_nullifiers: Vec::new(),
            authorizations: Vec::new(),
            processed_messages: 0,
        })
    }

    pub fn root(&self) -> Fr {
        self.tree.root()
    }

    pub fn tree(&self) -> &IncrementalTree {
        &self.tree
    }

    pub fn chain_hash(&self) -> Fr {
        self.chain_hash
    }

    pub fn records(&self) -> &[DeactivationRecord] {
        &self.records
    }

    pub fn processed_messages(&self) -> usize {
        self.processed_messages
    }

    pub fn gen_merkle_path(&self, leaf_index: usize) -> Result<MerklePath, Error> {
        self.tree.gen_merkle_path(leaf_index)
    }

    /// Whether `pub_key` was deactivated while registered at `state_index`
    pub fn is_deactivated(&self, state_index: u64, pub_key: &PubKey) -> bool {
        self.records
            .iter()
            .any(|r| r.state_index == state_index && r.leaf.pub_key == *pub_key)
    }

    pub fn is_nullifier_consumed(&self, nullifier: &Fr) -> bool {
        self.consumed_nullifiers.contains(nullifier)
    }

    pub fn authorization(&self, nullifier: &Fr) -> Option<&KeyChangeAuthorization> {
        self.authorizations.iter().find(|a| a.nullifier == *nullifier)
    }

    pub(crate) fn mark_applied(&mut self, nullifier: &Fr) {
        if let Some(auth) = self.authorizations.iter_mut().find(|a| a.nullifier == *nullifier) {
            auth.applied = true;
        }
    }

    /// Process the next batch of queued deactivation messages.
    ///
    /// Messages are taken in publication order and the batch is padded at
    /// the back. A batch with nothing left to process is all padding and
    /// leaves the chain hash where it was.
    pub(crate) fn process_batch<R: RngCore + CryptoRng>(
        &mut self,
        queue: &[PublishedMessage],
        ctx: &DeactivationContext,
        rng: &mut R,
    ) -> Result<DeactivationBatchInputs, Error> {
        let start = self.processed_messages;
        let end = std::cmp::min(start + ctx.batch_size, queue.len());
        let padding_status = padding_ciphertext(&ctx.coordinator.pub_key)?;

        let mut tree = self.tree.clone();
        let mut records = self.records.clone();
        let mut chain_hash = self.chain_hash;
        let current_root = tree.root();

        debug!(
            poll_id = ctx.poll_id,
            start,
            end,
            "processing deactivation batch"
        );

        let mut slots = Vec::with_capacity(ctx.batch_size);
        for index in start..start + ctx.batch_size {
            let published = match queue.get(index) {
                Some(published) => published,
                None => {
                    slots.push(DeactivationSlotWitness {
                        message: Message::zero(),
                        enc_pub_key: PubKey::zero(),
                        is_padding: true,
                        command: None,
                        rejection: None,
                        state_index: 0,
                        state_leaf: ctx.state_leaves[0],
                        state_leaf_path: ctx.state_tree.gen_merkle_path(0)?,
                        status: padding_status,
                        mask: Scalar::from(1u64),
                        deactivated_leaf_index: None,
                        chain_hash,
                    });
                    continue;
                }
            };

            chain_hash = hash2(chain_hash, published.message.hash(&published.enc_pub_key));

            let shared_key =
                derive_shared_key(&ctx.coordinator.priv_key, &published.enc_pub_key)?;
            let (command, signature) = Command::decrypt(&published.message, &shared_key);
            let mask = gen_random_scalar(rng);

            let validated = validate_deactivation(&command, &signature, ctx).and_then(|cmd| {
                let current = &ctx.state_leaves[cmd.state_index as usize].pub_key;
                let deactivated = records
                    .iter()
                    .any(|r| r.state_index == cmd.state_index && r.leaf.pub_key == *current);
                if deactivated {
                    Err(ValidationError::KeyDeactivated(cmd.state_index))
                } else {
                    Ok(cmd)
                }
            });

            let slot = match validated {
                Ok(cmd) => {
                    let state_index = cmd.state_index as usize;
                    let state_leaf = ctx.state_leaves[state_index];
                    let leaf = DeactivatedKeyLeaf {
                        pub_key: state_leaf.pub_key,
                        status: encrypt_bit(&ctx.coordinator.pub_key, true, &mask)?,
                        salt: cmd.salt,
                    };
                    let leaf_index = tree.insert(leaf.hash())?;
                    records.push(DeactivationRecord {
                        leaf,
                        state_index: cmd.state_index,
                        balance_at_deactivation: state_leaf.voice_credit_balance,
                    });
                    info!(
                        poll_id = ctx.poll_id,
                        state_index,
                        leaf_index,
                        "key deactivated"
                    );
                    DeactivationSlotWitness {
                        message: published.message.clone(),
                        enc_pub_key: published.enc_pub_key,
                        is_padding: false,
                        command: Some(command),
                        rejection: None,
                        state_index: cmd.state_index,
                        state_leaf,
                        state_leaf_path: ctx.state_tree.gen_merkle_path(state_index)?,
                        status: leaf.status,
                        mask,
                        deactivated_leaf_index: Some(leaf_index),
                        chain_hash,
                    }
                }
                Err(reason) => {
                    warn!(
                        poll_id = ctx.poll_id,
                        message_index = index,
                        %reason,
                        "deactivation request rejected"
                    );
                    DeactivationSlotWitness {
                        message: published.message.clone(),
                        enc_pub_key: published.enc_pub_key,
                        is_padding: false,
                        command: Some(command),
                        rejection: Some(reason),
                        state_index: 0,
                        state_leaf: ctx.state_leaves[0],
                        state_leaf_path: ctx.state_tree.gen_merkle_path(0)?,
                        status: encrypt_bit(&ctx.coordinator.pub_key, false, &mask)?,
                        mask,
                        deactivated_leaf_index: None,
                        chain_hash,
                    }
                }
            };
            slots.push(slot);
        }

        let inputs = DeactivationBatchInputs {
            poll_id: ctx.poll_id,
            batch_start_index: start,
            batch_size: ctx.batch_size,
            num_real_messages: end.saturating_sub(start),
            coordinator_pub_key: ctx.coordinator.pub_key,
            state_root: ctx.state_tree.root(),
            current_chain_hash: self.chain_hash,
            new_message_chain_hash: chain_hash,
            current_deactivated_root: current_root,
            new_deactivated_root: tree.root(),
            slots,
        };

        self.tree = tree;
        self.records = records;
        self.chain_hash = chain_hash;
        self.processed_messages = end.max(start);

        Ok(inputs)
    }

    /// Check a claim on a deactivated leaf and, if it holds, authorize the new key.
    ///
    /// Structural failures (bad proof, reused nullifier, a status that is not
    /// 1) are errors. A claim made with the wrong key, salt or balance is not:
    /// it comes back with `is_valid_status == false` and authorizes nothing.
    pub fn issue_new_key(
        &mut self,
        request: &NewKeyRequest,
        coordinator: &Keypair,
        z: &Scalar,
    ) -> Result<NewKeyOutcome, Error> {
        let record = *self
            .records
            .get(request.leaf_index)
            .ok_or(Error::LeafNotFound(request.leaf_index))?;

        let path = &request.path;
        if path.index != request.leaf_index
            || path.leaf != record.leaf.hash()
            || path.root != self.tree.root()
            || !IncrementalTree::verify_merkle_path(path, &self.tree.hashing())
        {
            return Err(Error::LeafNotFound(request.leaf_index));
        }

        let nullifier = nullifier(&request.old_priv_key, request.salt);
        if self.is_nullifier_consumed(&nullifier) {
            return Err(Error::NullifierReused);
        }

        let rerandomized = rerandomize(&coordinator.pub_key, z, &record.leaf.status)?;
        if !decrypt_bit(&coordinator.priv_key, &rerandomized)? {
            return Err(Error::StatusMismatch);
        }

        let claimed = DeactivatedKeyLeaf {
            pub_key: request.old_priv_key.pub_key(),
            status: record.leaf.status,
            salt: request.salt,
        };
        let is_valid_status = claimed.hash() == record.leaf.hash()
            && request.new_voice_credit_balance <= record.balance_at_deactivation
            && request.new_pub_key.is_valid();

        if is_valid_status {
            self.consumed_nullifiers.push(nullifier);
            self.authorizations.push(KeyChangeAuthorization {
                nullifier,
                state_index: record.state_index,
                new_pub_key: request.new_pub_key,
                new_voice_credit_balance: request.new_voice_credit_balance,
                applied: false,
            });
            info!(
                state_index = record.state_index,
                leaf_index = request.leaf_index,
                "new key issued"
            );
        } else {
            warn!(
                leaf_index = request.leaf_index,
                "new key claim does not match the deactivated leaf"
            );
        }

        Ok(NewKeyOutcome {
            is_valid_status,
            nullifier,
            state_index: record.state_index,
            deactivated_keys_root: self.tree.root(),
            original_status: record.leaf.status,
            z: *z,
            command: KeyChangeCommand {
                new_pub_key: request.new_pub_key,
                new_voice_credit_balance: request.new_voice_credit_balance,
                nullifier,
                status: rerandomized,
                poll_id: request.poll_id,
            },
        })
    }
}

fn validate_deactivation(
    command: &Command,
    signature: &Signature,
    ctx: &DeactivationContext,
) -> Result<VoteCommand, ValidationError> {
    let cmd = match command {
        Command::Vote(cmd) => *cmd,
        Command::KeyChange(_) | Command::TopUp(_) => return Err(ValidationError::WrongMessageType),
    };
    if !cmd.is_deactivation() {
        return Err(ValidationError::NotADeactivationRequest);
    }
    if cmd.poll_id != ctx.poll_id {
        return Err(ValidationError::PollIdMismatch {
            expected: ctx.poll_id,
            found: cmd.poll_id,
        });
    }
    if cmd.state_index == 0 || cmd.state_index >= ctx.state_leaves.len() as u64 {
        return Err(ValidationError::InvalidStateIndex(cmd.state_index));
    }
    let leaf = &ctx.state_leaves[cmd.state_index as usize];
    if !cmd.verify_signature(signature, &leaf.pub_key) {
        return Err(ValidationError::InvalidSignature);
    }
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    struct Fixture {
        rng: ChaCha20Rng,
        coordinator: Keypair,
        user: Keypair,
        state_leaves: Vec<StateLeaf>,
        state_tree: IncrementalTree,
    }

    fn fixture(seed: u64) -> Fixture {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let coordinator = Keypair::new(&mut rng);
        let user = Keypair::new(&mut rng);
        let state_leaves = vec![StateLeaf::blank(), StateLeaf::new(user.pub_key, 100, 1)];
        let mut state_tree = IncrementalTree::quin(2, StateLeaf::blank().hash()).unwrap();
        for leaf in &state_leaves {
            state_tree.insert(leaf.hash()).unwrap();
        }
        Fixture {
            rng,
            coordinator,
            user,
            state_leaves,
            state_tree,
        }
    }

    fn ctx(f: &Fixture) -> DeactivationContext {
        DeactivationContext {
            poll_id: 0,
            coordinator: &f.coordinator,
            state_leaves: &f.state_leaves,
            state_tree: &f.state_tree,
            batch_size: 5,
        }
    }

    fn request(f: &mut Fixture, salt: Fr) -> PublishedMessage {
        let ephemeral = Keypair::new(&mut f.rng);
        let key = derive_shared_key(&ephemeral.priv_key, &f.coordinator.pub_key).unwrap();
        let message = VoteCommand::deactivation(1, 1, 0, salt)
            .unwrap()
            .sign_and_encrypt(&f.user.priv_key, &key)
            .unwrap();
        PublishedMessage {
            message,
            enc_pub_key: ephemeral.pub_key,
        }
    }

    #[test]
    fn test_all_padding_batch_keeps_seed() {
        let f = fixture(60);
        let mut ledger = KeyDeactivationLedger::new(2).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let inputs = ledger.process_batch(&[], &ctx(&f), &mut rng).unwrap();

        assert_eq!(inputs.new_message_chain_hash, NOTHING_UP_MY_SLEEVE);
        assert_eq!(inputs.slots.len(), 5);
        assert!(inputs.slots.iter().all(|s| s.is_padding));
        assert!(!decrypt_bit(&f.coordinator.priv_key, &inputs.slots[0].status).unwrap());
        assert_eq!(ledger.root(), inputs.current_deactivated_root);
    }

    #[test]
    fn test_deactivation_inserts_status_one() {
        let mut f = fixture(61);
        let salt = gen_random_salt(&mut f.rng);
        let queue = vec![request(&mut f, salt)];
        let mut ledger = KeyDeactivationLedger::new(2).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let inputs = ledger.process_batch(&queue, &ctx(&f), &mut rng).unwrap();

        let expected_chain = hash2(
            NOTHING_UP_MY_SLEEVE,
            queue[0].message.hash(&queue[0].enc_pub_key),
        );
        assert_eq!(inputs.new_message_chain_hash, expected_chain);
        assert_eq!(inputs.num_real_messages, 1);
        assert_eq!(ledger.records().len(), 1);

        let record = ledger.records()[0];
        assert_eq!(record.state_index, 1);
        assert_eq!(record.balance_at_deactivation, 100);
        assert_eq!(record.leaf.salt, salt);
        assert!(decrypt_bit(&f.coordinator.priv_key, &record.leaf.status).unwrap());
        assert!(ledger.is_deactivated(1, &f.user.pub_key));
        assert_eq!(ledger.processed_messages(), 1);
    }

    #[test]
    fn test_chain_hash_is_deterministic() {
        let mut f = fixture(62);
        let queue = vec![
            request(&mut f, Fr::from(1u64)),
            request(&mut f, Fr::from(2u64)),
        ];

        let mut first = KeyDeactivationLedger::new(2).unwrap();
        let mut second = KeyDeactivationLedger::new(2).unwrap();
        let a = first
            .process_batch(&queue, &ctx(&f), &mut ChaCha20Rng::seed_from_u64(3))
            .unwrap();
        let b = second
            .process_batch(&queue, &ctx(&f), &mut ChaCha20Rng::seed_from_u64(4))
            .unwrap();
        assert_eq!(a.new_message_chain_hash, b.new_message_chain_hash);

        // the second request targets an already deactivated key
        assert_eq!(
            a.slots[1].rejection,
            Some(ValidationError::KeyDeactivated(1))
        );
        assert_eq!(first.records().len(), 1);
    }

    #[test]
    fn test_rejects_votes_and_foreign_signatures() {
        let mut f = fixture(63);
        let ephemeral = Keypair::new(&mut f.rng);
        let key = derive_shared_key(&ephemeral.priv_key, &f.coordinator.pub_key).unwrap();
        let stranger = Keypair::new(&mut f.rng);

        let vote = VoteCommand::new(1, f.user.pub_key, 0, 1, 1, 0, Fr::from(1u64))
            .unwrap()
            .sign_and_encrypt(&f.user.priv_key, &key)
            .unwrap();
        let forged = VoteCommand::deactivation(1, 1, 0, Fr::from(2u64))
            .unwrap()
            .sign_and_encrypt(&stranger.priv_key, &key)
            .unwrap();
        let queue = vec![
            PublishedMessage {
                message: vote,
                enc_pub_key: ephemeral.pub_key,
            },
            PublishedMessage {
                message: forged,
                enc_pub_key: ephemeral.pub_key,
            },
        ];

        let mut ledger = KeyDeactivationLedger::new(2).unwrap();
        let inputs = ledger
            .process_batch(&queue, &ctx(&f), &mut ChaCha20Rng::seed_from_u64(5))
            .unwrap();
        assert_eq!(
            inputs.slots[0].rejection,
            Some(ValidationError::NotADeactivationRequest)
        );
        assert_eq!(
            inputs.slots[1].rejection,
            Some(ValidationError::InvalidSignature)
        );
        assert!(ledger.records().is_empty());
        assert_eq!(inputs.new_deactivated_root, inputs.current_deactivated_root);
        assert_ne!(inputs.new_message_chain_hash, NOTHING_UP_MY_SLEEVE);
        assert!(!decrypt_bit(&f.coordinator.priv_key, &inputs.slots[1].status).unwrap());
    }

    #[test]
    fn test_issue_new_key() {
        let mut f = fixture(64);
        let salt = gen_random_salt(&mut f.rng);
        let queue = vec![request(&mut f, salt)];
        let mut ledger = KeyDeactivationLedger::new(2).unwrap();
        ledger
            .process_batch(&queue, &ctx(&f), &mut ChaCha20Rng::seed_from_u64(6))
            .unwrap();

        let new_user = Keypair::new(&mut f.rng);
        let new_key_request = NewKeyRequest {
            old_priv_key: f.user.priv_key.clone(),
            leaf_index: 0,
            salt,
            path: ledger.gen_merkle_path(0).unwrap(),
            new_pub_key: new_user.pub_key,
            new_voice_credit_balance: 100,
            poll_id: 0,
        };
        let z = gen_random_scalar(&mut f.rng);
        let outcome = ledger
            .issue_new_key(&new_key_request, &f.coordinator, &z)
            .unwrap();

        assert!(outcome.is_valid_status);
        assert_eq!(outcome.nullifier, nullifier(&f.user.priv_key, salt));
        assert_ne!(outcome.command.status, outcome.original_status);
        assert!(decrypt_bit(&f.coordinator.priv_key, &outcome.command.status).unwrap());
        let auth = ledger.authorization(&outcome.nullifier).unwrap();
        assert_eq!(auth.state_index, 1);
        assert!(!auth.applied);

        assert!(matches!(
            ledger.issue_new_key(&new_key_request, &f.coordinator, &z),
            Err(Error::NullifierReused)
        ));
    }

    #[test]
    fn test_issue_new_key_rejections() {
        let mut f = fixture(65);
        let salt = gen_random_salt(&mut f.rng);
        let queue = vec![request(&mut f, salt)];
        let mut ledger = KeyDeactivationLedger::new(2).unwrap();
        ledger
            .process_batch(&queue, &ctx(&f), &mut ChaCha20Rng::seed_from_u64(7))
            .unwrap();
        let z = gen_random_scalar(&mut f.rng);

        let stranger = Keypair::new(&mut f.rng);
        let mut claim = NewKeyRequest {
            old_priv_key: stranger.priv_key.clone(),
            leaf_index: 0,
            salt,
            path: ledger.gen_merkle_path(0).unwrap(),
            new_pub_key: stranger.pub_key,
            new_voice_credit_balance: 10,
            poll_id: 0,
        };
        let outcome = ledger.issue_new_key(&claim, &f.coordinator, &z).unwrap();
        assert!(!outcome.is_valid_status);
        assert!(ledger.authorization(&outcome.nullifier).is_none());

        claim.old_priv_key = f.user.priv_key.clone();
        claim.new_voice_credit_balance = 101;
        assert!(!ledger.issue_new_key(&claim, &f.coordinator, &z).unwrap().is_valid_status);

        claim.new_voice_credit_balance = 100;
        claim.path.path_elements[0][0] += Fr::from(1u64);
        assert!(matches!(
            ledger.issue_new_key(&claim, &f.coordinator, &z),
            Err(Error::LeafNotFound(0))
        ));

        claim.leaf_index = 3;
        assert!(matches!(
            ledger.issue_new_key(&claim, &f.coordinator, &z),
            Err(Error::LeafNotFound(3))
        ));
    }

    #[test]
    fn test_issue_new_key_requires_status_one() {
        let mut f = fixture(66);
        let salt = gen_random_salt(&mut f.rng);
        let randomness = gen_random_scalar(&mut f.rng);
        let leaf = DeactivatedKeyLeaf {
            pub_key: f.user.pub_key,
            status: encrypt_bit(&f.coordinator.pub_key, false, &randomness).unwrap(),
            salt,
        };

        let mut ledger = KeyDeactivationLedger::new(2).unwrap();
        ledger.tree.insert(leaf.hash()).unwrap();
        ledger.records.push(DeactivationRecord {
            leaf,
            state_index: 1,
            balance_at_deactivation: 100,
        });

        let claim = NewKeyRequest {
            old_priv_key: f.user.priv_key.clone(),
            leaf_index: 0,
            salt,
            path: ledger.gen_merkle_path(0).unwrap(),
            new_pub_key: Keypair::new(&mut f.rng).pub_key,
            new_voice_credit_balance: 100,
            poll_id: 0,
        };
        let z = gen_random_scalar(&mut f.rng);
        assert!(matches!(
            ledger.issue_new_key(&claim, &f.coordinator, &z),
            Err(Error::StatusMismatch)
        ));
        assert!(!ledger.is_nullifier_consumed(&nullifier(&f.user.priv_key, salt)));
    }
}
