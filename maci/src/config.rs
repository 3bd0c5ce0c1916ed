use crate::*;
use num_bigint::BigUint;

pub const DEFAULT_STATE_TREE_DEPTH: usize = 10;

/// Arity of every protocol tree
pub const TREE_ARITY: usize = 5;

/// Deployment-wide settings
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaciConfig {
    pub state_tree_depth: usize,
}

impl Default for MaciConfig {
    fn default() -> Self {
        MaciConfig {
            state_tree_depth: DEFAULT_STATE_TREE_DEPTH,
        }
    }
}

impl MaciConfig {
    /// Read `MACI_STATE_TREE_DEPTH`, falling back to the default when unset
    pub fn from_env() -> Result<Self, Error> {
        let mut config = MaciConfig::default();
        if let Ok(depth) = std::env::var("MACI_STATE_TREE_DEPTH") {
            config.state_tree_depth = depth.parse().map_err(|_| {
                Error::InvalidConfig(format!("MACI_STATE_TREE_DEPTH is not a number: {}", depth))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: MaciConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.state_tree_depth == 0 || self.state_tree_depth > 20 {
            return Err(Error::InvalidConfig(format!(
                "state tree depth {} must be between 1 and 20",
                self.state_tree_depth
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VotingMode {
    /// Casting weight `w` costs `w^2` voice credits
    Quadratic,

    /// Casting weight `w` costs `w` voice credits
    NonQuadratic,
}

impl VotingMode {
    pub fn cost(&self, weight: u64) -> u128 {
        match self {
            VotingMode::Quadratic => weight as u128 * weight as u128,
            VotingMode::NonQuadratic => weight as u128,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeDepths {
    /// Depth of the ballot subtree consumed by one tally batch
    pub int_state_tree_depth: usize,
    pub message_tree_depth: usize,

    /// Depth of the message subtree consumed by one processing batch
    pub message_tree_sub_depth: usize,
    pub vote_option_tree_depth: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxValues {
    pub max_messages: usize,
    pub max_vote_options: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    pub message_batch_size: usize,
    pub tally_batch_size: usize,

    /// Side of one block of ballot pairs in the subsidy calculation
    pub subsidy_batch_size: usize,
}

/// Per-poll parameters, fixed once the poll is deployed
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Seconds the poll accepts messages for
    pub duration: u64,
    pub tree_depths: TreeDepths,
    pub max_values: MaxValues,
    pub batch_sizes: BatchSizes,
    pub mode: VotingMode,

    /// Vote weights needing more bits than this are rejected
    pub max_vote_weight_bits: u32,
}

impl PollConfig {
    /// A config whose batch sizes are derived from the tree depths
    pub fn new(
        duration: u64,
        tree_depths: TreeDepths,
        max_values: MaxValues,
        mode: VotingMode,
    ) -> Self {
        PollConfig {
            duration,
            tree_depths,
            max_values,
            batch_sizes: BatchSizes {
                message_batch_size: TREE_ARITY.saturating_pow(tree_depths.message_tree_sub_depth as u32),
                tally_batch_size: TREE_ARITY.saturating_pow(tree_depths.int_state_tree_depth as u32),
                subsidy_batch_size: TREE_ARITY.saturating_pow(tree_depths.int_state_tree_depth as u32),
            },
            mode,
            max_vote_weight_bits: COMMAND_FIELD_BITS,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self, state_tree_depth: usize) -> Result<(), Error> {
        let depths = &self.tree_depths;
        let invalid = |msg: String| -> Result<(), Error> { Err(Error::InvalidConfig(msg)) };

        if depths.message_tree_depth == 0 || depths.message_tree_depth > 20 {
            return invalid(format!(
                "message tree depth {} must be between 1 and 20",
                depths.message_tree_depth
            ));
        }
        if depths.message_tree_sub_depth == 0
            || depths.message_tree_sub_depth > depths.message_tree_depth
        {
            return invalid(format!(
                "message tree sub depth {} must be between 1 and the message tree depth",
                depths.message_tree_sub_depth
            ));
        }
        if depths.int_state_tree_depth == 0 || depths.int_state_tree_depth > state_tree_depth {
            return invalid(format!(
                "intermediate state tree depth {} must be between 1 and the state tree depth {}",
                depths.int_state_tree_depth, state_tree_depth
            ));
        }
        if depths.vote_option_tree_depth == 0 || depths.vote_option_tree_depth > 16 {
            return invalid(format!(
                "vote option tree depth {} must be between 1 and 16",
                depths.vote_option_tree_depth
            ));
        }

        let message_batch = TREE_ARITY.saturating_pow(depths.message_tree_sub_depth as u32);
        if self.batch_sizes.message_batch_size != message_batch {
            return invalid(format!(
                "message batch size must be {}, got {}",
                message_batch, self.batch_sizes.message_batch_size
            ));
        }
        let tally_batch = TREE_ARITY.saturating_pow(depths.int_state_tree_depth as u32);
        if self.batch_sizes.tally_batch_size != tally_batch {
            return invalid(format!(
                "tally batch size must be {}, got {}",
                tally_batch, self.batch_sizes.tally_batch_size
            ));
        }
        if self.batch_sizes.subsidy_batch_size != tally_batch {
            return invalid(format!(
                "subsidy batch size must be {}, got {}",
                tally_batch, self.batch_sizes.subsidy_batch_size
            ));
        }

        let max_options = TREE_ARITY.saturating_pow(depths.vote_option_tree_depth as u32);
        if self.max_values.max_vote_options == 0 || self.max_values.max_vote_options > max_options {
            return invalid(format!(
                "max vote options {} must be between 1 and {}",
                self.max_values.max_vote_options, max_options
            ));
        }
        let message_capacity = TREE_ARITY
            .checked_pow(depths.message_tree_depth as u32)
            .unwrap_or(usize::MAX);
        if self.max_values.max_messages >= message_capacity {
            return invalid(format!(
                "max messages {} must be below the message tree capacity {}",
                self.max_values.max_messages, message_capacity
            ));
        }
        if self.max_vote_weight_bits == 0 || self.max_vote_weight_bits > COMMAND_FIELD_BITS {
            return invalid(format!(
                "max vote weight bits {} must be between 1 and {}",
                self.max_vote_weight_bits, COMMAND_FIELD_BITS
            ));
        }
        Ok(())
    }

    /// Identifies the message processing circuit these parameters need
    pub fn process_vk_signature(&self, state_tree_depth: usize) -> Result<Fr, Error> {
        pack_limbs(&[
            self.tree_depths.vote_option_tree_depth as u64,
            self.tree_depths.message_tree_depth as u64,
            state_tree_depth as u64,
            self.batch_sizes.message_batch_size as u64,
        ])
    }

    /// Identifies the tally circuit these parameters need
    pub fn tally_vk_signature(&self, state_tree_depth: usize) -> Result<Fr, Error> {
        pack_limbs(&[
            self.tree_depths.vote_option_tree_depth as u64,
            self.tree_depths.int_state_tree_depth as u64,
            state_tree_depth as u64,
        ])
    }

    /// Same parameters as the tally circuit
    pub fn subsidy_vk_signature(&self, state_tree_depth: usize) -> Result<Fr, Error> {
        self.tally_vk_signature(state_tree_depth)
    }
}

/// Verifying key references stored with a poll
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyingKeyRefs {
    #[serde(with = "serde_field")]
    pub process: Fr,

    #[serde(with = "serde_field")]
    pub tally: Fr,

    #[serde(with = "serde_field")]
    pub subsidy: Fr,
}

// 64-bit limbs, lowest first
fn pack_limbs(limbs: &[u64]) -> Result<Fr, Error> {
    let mut value = BigUint::from(0u64);
    for (i, limb) in limbs.iter().enumerate() {
        value |= BigUint::from(*limb) << (64 * i);
    }
    fr_from_biguint(&value)
}
