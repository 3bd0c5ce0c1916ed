use crate::*;
use num_enum::TryFromPrimitive;

/// Bits available to each small value packed into a vote command
pub const COMMAND_FIELD_BITS: u32 = 50;

/// Field elements in a decrypted command
pub const COMMAND_PLAINTEXT_LENGTH: usize = 9;

/// Field elements in a published message: the iv plus the encrypted command
pub const MESSAGE_DATA_LENGTH: usize = COMMAND_PLAINTEXT_LENGTH + 1;

const VOTE_PACK_WIDTHS: [u32; 5] = [COMMAND_FIELD_BITS; 5];

lazy_static! {
    /// Recorded as the encryption key of top-up messages, which travel in the clear
    pub static ref TOP_UP_PAD_KEY: PubKey = PrivKey::from_raw(NOTHING_UP_MY_SLEEVE).pub_key();
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CommandType {
    Vote = 1,
    KeyChange = 2,
    TopUp = 3,
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            CommandType::Vote => "vote",
            CommandType::KeyChange => "key_change",
            CommandType::TopUp => "top_up",
        };
        write!(f, "{}", name)
    }
}

/// An encrypted command as published on chain
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: CommandType,

    #[serde(with = "serde_field::vec")]
    pub data: Vec<Fr>,
}

impl Message {
    pub fn new(msg_type: CommandType, data: Vec<Fr>) -> Result<Self, Error> {
        let message = Message { msg_type, data };
        message.validate()?;
        Ok(message)
    }

    /// Messages are fixed length; `data` is public, so check before publishing
    pub fn validate(&self) -> Result<(), Error> {
        if self.data.len() != MESSAGE_DATA_LENGTH {
            return Err(Error::ValueOutOfRange(format!(
                "message must have {} elements, got {}",
                MESSAGE_DATA_LENGTH,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Build a message from an on-chain event, where the type is a raw tag
    pub fn from_raw(msg_type: u8, data: Vec<Fr>) -> Result<Self, Error> {
        let msg_type = CommandType::try_from_primitive(msg_type)
            .map_err(|_| Error::ValueOutOfRange(format!("unknown message type {}", msg_type)))?;
        Message::new(msg_type, data)
    }

    /// The canonical placeholder message that sits at message index 0
    pub fn padding() -> Self {
        let mut data = vec![Fr::from(0u64); MESSAGE_DATA_LENGTH];
        data[0] = NOTHING_UP_MY_SLEEVE;
        Message {
            msg_type: CommandType::Vote,
            data,
        }
    }

    /// All-zero message filling unused deactivation batch slots
    pub fn zero() -> Self {
        Message {
            msg_type: CommandType::Vote,
            data: vec![Fr::from(0u64); MESSAGE_DATA_LENGTH],
        }
    }

    pub fn as_array(&self) -> Vec<Fr> {
        let mut elements = Vec::with_capacity(self.data.len() + 1);
        elements.push(Fr::from(self.msg_type as u8 as u64));
        elements.extend_from_slice(&self.data);
        elements
    }

    /// Leaf value of this message in the message tree
    pub fn hash(&self, enc_pub_key: &PubKey) -> Fr {
        let mut elements = self.as_array();
        elements.push(enc_pub_key.x());
        elements.push(enc_pub_key.y());
        hash_n(&elements)
    }
}

/// A decrypted command
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Vote(VoteCommand),
    KeyChange(KeyChangeCommand),
    TopUp(TopUpCommand),
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Vote(_) => CommandType::Vote,
            Command::KeyChange(_) => CommandType::KeyChange,
            Command::TopUp(_) => CommandType::TopUp,
        }
    }

    pub fn poll_id(&self) -> u64 {
        match self {
            Command::Vote(c) => c.poll_id,
            Command::KeyChange(c) => c.poll_id,
            Command::TopUp(c) => c.poll_id,
        }
    }

    /// Decrypt a message.
    ///
    /// This cannot fail. A message encrypted under a different key, or one
    /// that was never a real command, decrypts to a command full of
    /// meaningless values that later validation rejects. Key changes and
    /// top-ups carry no signature and come back with a default one. Top-ups
    /// are not encrypted and are read as they are.
    pub fn decrypt(message: &Message, key: &SharedKey) -> (Command, Signature) {
        let plaintext = || {
            let mut plaintext = decrypt(&message.data, key);
            plaintext.resize(COMMAND_PLAINTEXT_LENGTH, Fr::from(0u64));
            plaintext
        };

        match message.msg_type {
            CommandType::Vote => {
                let (command, signature) = VoteCommand::from_plaintext(&plaintext());
                (Command::Vote(command), signature)
            }
            CommandType::KeyChange => (
                Command::KeyChange(KeyChangeCommand::from_plaintext(&plaintext())),
                Signature::default(),
            ),
            CommandType::TopUp => (
                Command::TopUp(TopUpCommand::from_data(&message.data)),
                Signature::default(),
            ),
        }
    }
}

/// Vote for an option, or change the key, or (with a zero key) ask for the
/// key to be deactivated
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteCommand {
    pub state_index: u64,
    pub new_pub_key: PubKey,
    pub vote_option_index: u64,
    pub new_vote_weight: u64,
    pub nonce: u64,
    pub poll_id: u64,

    #[serde(with = "serde_field")]
    pub salt: Fr,
}

impl VoteCommand {
    pub fn new(
        state_index: u64,
        new_pub_key: PubKey,
        vote_option_index: u64,
        new_vote_weight: u64,
        nonce: u64,
        poll_id: u64,
        salt: Fr,
    ) -> Result<Self, Error> {
        let command = VoteCommand {
            state_index,
            new_pub_key,
            vote_option_index,
            new_vote_weight,
            nonce,
            poll_id,
            salt,
        };
        command.packed()?;
        Ok(command)
    }

    /// A request to deactivate the key currently registered at `state_index`
    pub fn deactivation(state_index: u64, nonce: u64, poll_id: u64, salt: Fr) -> Result<Self, Error> {
        VoteCommand::new(state_index, PubKey::zero(), 0, 0, nonce, poll_id, salt)
    }

    pub fn is_deactivation(&self) -> bool {
        self.new_pub_key.is_zero()
    }

    pub fn packed(&self) -> Result<Fr, Error> {
        pack_fields(
            &[
                self.state_index,
                self.vote_option_index,
                self.new_vote_weight,
                self.nonce,
                self.poll_id,
            ],
            &VOTE_PACK_WIDTHS,
        )
    }

    pub fn as_array(&self) -> Result<[Fr; 4], Error> {
        Ok([
            self.packed()?,
            self.new_pub_key.x(),
            self.new_pub_key.y(),
            self.salt,
        ])
    }

    /// The value that gets signed
    pub fn hash(&self) -> Result<Fr, Error> {
        Ok(hash4(self.as_array()?))
    }

    pub fn sign(&self, priv_key: &PrivKey) -> Result<Signature, Error> {
        Ok(Signature::sign(priv_key, self.hash()?))
    }

    pub fn verify_signature(&self, signature: &Signature, pub_key: &PubKey) -> bool {
        match self.hash() {
            Ok(hash) => signature.verify(hash, pub_key),
            Err(_) => false,
        }
    }

    pub fn encrypt(&self, signature: &Signature, key: &SharedKey) -> Result<Message, Error> {
        let [packed, x, y, salt] = self.as_array()?;
        let plaintext = vec![
            packed,
            x,
            y,
            salt,
            signature.r8.x,
            signature.r8.y,
            signature.s,
            Fr::from(0u64),
            Fr::from(0u64),
        ];
        Message::new(CommandType::Vote, encrypt(&plaintext, key))
    }

    /// Sign with the current key and encrypt for the coordinator
    pub fn sign_and_encrypt(&self, priv_key: &PrivKey, key: &SharedKey) -> Result<Message, Error> {
        let signature = self.sign(priv_key)?;
        self.encrypt(&signature, key)
    }

    fn from_plaintext(plaintext: &[Fr]) -> (VoteCommand, Signature) {
        let packed = plaintext[0];
        let field = |i: u32| extract_bits(&packed, i * COMMAND_FIELD_BITS, COMMAND_FIELD_BITS);

        let command = VoteCommand {
            state_index: field(0),
            new_pub_key: PubKey::new(plaintext[1], plaintext[2]),
            vote_option_index: field(1),
            new_vote_weight: field(2),
            nonce: field(3),
            poll_id: field(4),
            salt: plaintext[3],
        };
        let signature = Signature {
            r8: CurvePoint::new(plaintext[4], plaintext[5]),
            s: plaintext[6],
        };
        (command, signature)
    }
}

/// Bind a new key to a deactivated one, proven by a nullifier
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyChangeCommand {
    pub new_pub_key: PubKey,
    pub new_voice_credit_balance: u128,

    #[serde(with = "serde_field")]
    pub nullifier: Fr,

    /// The deactivation status ciphertext, rerandomized under the coordinator key
    pub status: ElGamalCiphertext,

    pub poll_id: u64,
}

impl KeyChangeCommand {
    pub fn as_array(&self) -> [Fr; COMMAND_PLAINTEXT_LENGTH] {
        let [c1x, c1y, c2x, c2y] = self.status.as_array();
        [
            self.new_pub_key.x(),
            self.new_pub_key.y(),
            Fr::from(self.new_voice_credit_balance),
            self.nullifier,
            c1x,
            c1y,
            c2x,
            c2y,
            Fr::from(self.poll_id),
        ]
    }

    pub fn hash(&self) -> Fr {
        hash_n(&self.as_array())
    }

    pub fn encrypt(&self, key: &SharedKey) -> Result<Message, Error> {
        Message::new(CommandType::KeyChange, encrypt(&self.as_array(), key))
    }

    fn from_plaintext(plaintext: &[Fr]) -> KeyChangeCommand {
        KeyChangeCommand {
            new_pub_key: PubKey::new(plaintext[0], plaintext[1]),
            new_voice_credit_balance: fr_to_u128(&plaintext[2]).unwrap_or(u128::MAX),
            nullifier: plaintext[3],
            status: ElGamalCiphertext {
                c1: CurvePoint::new(plaintext[4], plaintext[5]),
                c2: CurvePoint::new(plaintext[6], plaintext[7]),
            },
            poll_id: fr_to_u64(&plaintext[8]).unwrap_or(u64::MAX),
        }
    }
}

/// Add voice credits to a state leaf.
///
/// Top-ups are paid for on chain, so they are public: the message holds the
/// plain values and no signature.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopUpCommand {
    pub state_index: u64,
    pub amount: u128,
    pub poll_id: u64,
}

impl TopUpCommand {
    pub fn as_array(&self) -> [Fr; 3] {
        [
            Fr::from(self.state_index),
            Fr::from(self.amount),
            Fr::from(self.poll_id),
        ]
    }

    /// The message to publish: the plain values, zero padded
    pub fn to_message(&self) -> Message {
        let mut data = vec![Fr::from(0u64); MESSAGE_DATA_LENGTH];
        data[..3].copy_from_slice(&self.as_array());
        Message {
            msg_type: CommandType::TopUp,
            data,
        }
    }

    fn from_data(data: &[Fr]) -> TopUpCommand {
        let value = |i: usize| data.get(i).copied().unwrap_or_default();
        TopUpCommand {
            state_index: fr_to_u64(&value(0)).unwrap_or(u64::MAX),
            amount: fr_to_u128(&value(1)).unwrap_or(u128::MAX),
            poll_id: fr_to_u64(&value(2)).unwrap_or(u64::MAX),
        }
    }
}
