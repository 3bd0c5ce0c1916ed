use crate::*;
use ark_crypto_primitives::sponge::poseidon::{
    find_poseidon_ark_and_mds, PoseidonConfig, PoseidonSponge,
};
use ark_crypto_primitives::sponge::CryptographicSponge;
use ark_ff::{BigInteger, PrimeField};
use sha2::{Digest, Sha256};

const POSEIDON_RATE: usize = 2;
const POSEIDON_FULL_ROUNDS: u64 = 8;
const POSEIDON_PARTIAL_ROUNDS: u64 = 57;
const POSEIDON_ALPHA: u64 = 5;

lazy_static! {
    static ref POSEIDON_CONFIG: PoseidonConfig<Fr> = poseidon_config();
}

fn poseidon_config() -> PoseidonConfig<Fr> {
    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        Fr::MODULUS_BIT_SIZE as u64,
        POSEIDON_RATE,
        POSEIDON_FULL_ROUNDS,
        POSEIDON_PARTIAL_ROUNDS,
        0,
    );

    PoseidonConfig::new(
        POSEIDON_FULL_ROUNDS as usize,
        POSEIDON_PARTIAL_ROUNDS as usize,
        POSEIDON_ALPHA,
        mds,
        ark,
        POSEIDON_RATE,
        1,
    )
}

/// Poseidon over any number of inputs.
///
/// The input length is absorbed first, so `[a]` and `[a, 0]` hash differently.
pub fn hash_n(inputs: &[Fr]) -> Fr {
    let mut sponge = PoseidonSponge::<Fr>::new(&POSEIDON_CONFIG);
    sponge.absorb(&Fr::from(inputs.len() as u64));
    sponge.absorb(&inputs.to_vec());
    sponge.squeeze_field_elements::<Fr>(1)[0]
}

pub fn hash2(a: Fr, b: Fr) -> Fr {
    hash_n(&[a, b])
}

pub fn hash3(a: Fr, b: Fr, c: Fr) -> Fr {
    hash_n(&[a, b, c])
}

pub fn hash4(inputs: [Fr; 4]) -> Fr {
    hash_n(&inputs)
}

pub fn hash5(inputs: [Fr; 5]) -> Fr {
    hash_n(&inputs)
}

pub fn hash_left_right(left: Fr, right: Fr) -> Fr {
    hash2(left, right)
}

pub fn hash_one(value: Fr) -> Fr {
    hash2(value, Fr::from(0u64))
}

/// SHA-256 of the 32-byte big-endian encodings, reduced into the field
pub fn sha256_hash(inputs: &[Fr]) -> Fr {
    let mut hasher = Sha256::new();
    for input in inputs {
        hasher.update(&input.into_bigint().to_bytes_be());
    }
    Fr::from_be_bytes_mod_order(&hasher.finalize())
}

/// Hash function used for a level of a Merkle tree
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HashKind {
    Poseidon,
    Sha256,
}

impl HashKind {
    pub fn hash(&self, inputs: &[Fr]) -> Fr {
        match self {
            HashKind::Poseidon => hash_n(inputs),
            HashKind::Sha256 => sha256_hash(inputs),
        }
    }
}
