use crate::*;
use ark_ff::{BigInteger, PrimeField};
use ark_std::UniformRand;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};
use std::fmt;

/// A raw private key.
///
/// The scalar actually used on the curve is derived from it with `formatted`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivKey(#[serde(with = "serde_field")] Fr);

impl PrivKey {
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        PrivKey(Fr::rand(rng))
    }

    pub fn from_raw(raw: Fr) -> Self {
        PrivKey(raw)
    }

    pub fn raw(&self) -> Fr {
        self.0
    }

    fn digest(&self) -> Vec<u8> {
        Sha512::digest(&self.0.into_bigint().to_bytes_le()).to_vec()
    }

    /// The secret scalar: the first half of SHA-512(raw key), reduced into the subgroup
    pub fn formatted(&self) -> Scalar {
        Scalar::from_le_bytes_mod_order(&self.digest()[..32])
    }

    /// Second half of the key digest, used to derive signing nonces
    pub(crate) fn nonce_prefix(&self) -> Vec<u8> {
        self.digest()[32..].to_vec()
    }

    pub fn pub_key(&self) -> PubKey {
        PubKey(base_mul(&self.formatted()).into())
    }
}

impl fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PrivKey(..)")
    }
}

/// A public key as raw coordinates.
///
/// `PubKey::zero()` is the reserved sentinel meaning "deactivate my key".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PubKey(pub CurvePoint);

impl PubKey {
    pub fn new(x: Fr, y: Fr) -> Self {
        PubKey(CurvePoint::new(x, y))
    }

    pub fn zero() -> Self {
        PubKey(CurvePoint::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn x(&self) -> Fr {
        self.0.x
    }

    pub fn y(&self) -> Fr {
        self.0.y
    }

    pub fn as_array(&self) -> [Fr; 2] {
        [self.0.x, self.0.y]
    }

    pub fn to_point(&self) -> Result<Point, Error> {
        self.0.to_point()
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_valid()
    }

    /// `InvalidPoint` unless this is a point of the prime-order subgroup
    pub fn validate(&self) -> Result<(), Error> {
        self.to_point().map(|_| ())
    }

    pub fn hash(&self) -> Fr {
        hash2(self.0.x, self.0.y)
    }
}

impl From<Point> for PubKey {
    fn from(point: Point) -> Self {
        PubKey(point.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    pub priv_key: PrivKey,
    pub pub_key: PubKey,
}

impl Keypair {
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Keypair::from_priv(PrivKey::new(rng))
    }

    pub fn from_priv(priv_key: PrivKey) -> Self {
        let pub_key = priv_key.pub_key();
        Keypair { priv_key, pub_key }
    }
}

/// Symmetric key agreed between a user and the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedKey(pub CurvePoint);

/// ECDH: formatted(sk) * pk
pub fn derive_shared_key(priv_key: &PrivKey, pub_key: &PubKey) -> Result<SharedKey, Error> {
    let point = pub_key.to_point()?;
    Ok(SharedKey(point_mul(&point, &priv_key.formatted()).into()))
}

/// A uniformly random field element, for salts
pub fn gen_random_salt<R: RngCore + CryptoRng>(rng: &mut R) -> Fr {
    Fr::rand(rng)
}

/// A uniformly random subgroup scalar, for ElGamal masks
pub fn gen_random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    Scalar::rand(rng)
}
