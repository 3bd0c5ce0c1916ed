use crate::*;

/// A registered participant
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLeaf {
    pub pub_key: PubKey,
    pub voice_credit_balance: u128,
    pub timestamp: u64,
}

impl StateLeaf {
    pub fn new(pub_key: PubKey, voice_credit_balance: u128, timestamp: u64) -> Self {
        StateLeaf {
            pub_key,
            voice_credit_balance,
            timestamp,
        }
    }

    /// The all-zero leaf kept at state index 0
    pub fn blank() -> Self {
        StateLeaf::new(PubKey::zero(), 0, 0)
    }

    pub fn as_array(&self) -> [Fr; 4] {
        [
            self.pub_key.x(),
            self.pub_key.y(),
            Fr::from(self.voice_credit_balance),
            Fr::from(self.timestamp),
        ]
    }

    pub fn hash(&self) -> Fr {
        hash4(self.as_array())
    }

    /// A copy with a new key and balance; the registration time is kept
    pub fn with_key_and_balance(&self, pub_key: PubKey, voice_credit_balance: u128) -> Self {
        StateLeaf {
            pub_key,
            voice_credit_balance,
            timestamp: self.timestamp,
        }
    }
}
