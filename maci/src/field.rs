//! Field and curve arithmetic.
//!
//! Every value that ends up in a tree, a hash or a command is an element of
//! the BN254 scalar field. Keys live on Baby Jubjub, the twisted Edwards curve
//! defined over that same field, so curve coordinates are field elements too.

use crate::*;
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::{BigInteger, MontFp, PrimeField, Zero};
use num_bigint::BigUint;
use std::fmt;

/// Element of the circuit's native prime field
pub type Fr = ark_bn254::Fr;

/// Element of the scalar field of Baby Jubjub's prime-order subgroup
pub type Scalar = ark_ed_on_bn254::Fr;

/// A validated Baby Jubjub point
pub type Point = ark_ed_on_bn254::EdwardsAffine;

/// Seeds the deactivation chain hash and fills empty deactivated-key leaves.
///
/// keccak256("Maci") reduced into the field.
pub const NOTHING_UP_MY_SLEEVE: Fr =
    MontFp!("8370432830353022751713833565135785980866757267633941821328460903436894336785");

/// Parse a canonical decimal string, rejecting values at or above the modulus
pub fn fr_from_decimal(s: &str) -> Result<Fr, Error> {
    let value: BigUint = s
        .parse()
        .map_err(|_| Error::InvalidFieldElement(s.to_string()))?;
    fr_from_biguint(&value)
}

/// Canonical decimal string of a field element
pub fn fr_to_decimal(value: &Fr) -> String {
    BigUint::from(*value).to_string()
}

pub fn fr_modulus() -> BigUint {
    BigUint::from_bytes_le(&Fr::MODULUS.to_bytes_le())
}

pub fn fr_from_biguint(value: &BigUint) -> Result<Fr, Error> {
    if value >= &fr_modulus() {
        return Err(Error::InvalidFieldElement(value.to_string()));
    }
    Ok(Fr::from_le_bytes_mod_order(&value.to_bytes_le()))
}

/// Read a field element as a u64, or None if it does not fit
pub fn fr_to_u64(value: &Fr) -> Option<u64> {
    let bits = value.into_bigint();
    if bits.0[1..].iter().any(|limb| *limb != 0) {
        return None;
    }
    Some(bits.0[0])
}

/// Read a field element as a u128, or None if it does not fit
pub fn fr_to_u128(value: &Fr) -> Option<u128> {
    let bits = value.into_bigint();
    if bits.0[2..].iter().any(|limb| *limb != 0) {
        return None;
    }
    Some((bits.0[1] as u128) << 64 | bits.0[0] as u128)
}

/// Reduce a circuit field element into the subgroup scalar field
pub fn fr_to_scalar(value: &Fr) -> Scalar {
    Scalar::from_le_bytes_mod_order(&value.into_bigint().to_bytes_le())
}

/// Embed a subgroup scalar into the circuit field (always fits, the subgroup order is smaller)
pub fn scalar_to_fr(value: &Scalar) -> Fr {
    Fr::from_le_bytes_mod_order(&value.into_bigint().to_bytes_le())
}

/// Checks whether a field element, read as an integer, is a canonical scalar (below the subgroup order)
pub fn fr_is_canonical_scalar(value: &Fr) -> bool {
    let order = BigUint::from_bytes_le(&Scalar::MODULUS.to_bytes_le());
    BigUint::from(*value) < order
}

pub fn base_point() -> Point {
    Point::generator()
}

pub fn identity() -> Point {
    <Point as AffineRepr>::zero()
}

pub fn point_add(a: &Point, b: &Point) -> Point {
    (a.into_group() + b.into_group()).into_affine()
}

pub fn point_sub(a: &Point, b: &Point) -> Point {
    (a.into_group() - b.into_group()).into_affine()
}

pub fn point_mul(p: &Point, s: &Scalar) -> Point {
    (p.into_group() * s).into_affine()
}

pub fn base_mul(s: &Scalar) -> Point {
    point_mul(&base_point(), s)
}

/// Raw curve coordinates.
///
/// Public keys and points carried inside commands are stored unvalidated so
/// that the (0, 0) sentinel and garbage from a foreign-key decryption can be
/// represented. Use `to_point` before doing curve arithmetic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CurvePoint {
    #[serde(with = "serde_field")]
    pub x: Fr,

    #[serde(with = "serde_field")]
    pub y: Fr,
}

impl CurvePoint {
    pub fn new(x: Fr, y: Fr) -> Self {
        CurvePoint { x, y }
    }

    /// The (0, 0) pair, which is not a curve point
    pub fn zero() -> Self {
        CurvePoint::default()
    }

    pub fn is_zero(&self) -> bool {
        self.x.is_zero() && self.y.is_zero()
    }

    /// Validate into a point of the prime-order subgroup
    pub fn to_point(&self) -> Result<Point, Error> {
        let point = Point::new_unchecked(self.x, self.y);
        if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
            return Err(Error::InvalidPoint);
        }
        Ok(point)
    }

    pub fn is_valid(&self) -> bool {
        self.to_point().is_ok()
    }
}

impl From<Point> for CurvePoint {
    fn from(point: Point) -> Self {
        CurvePoint {
            x: point.x,
            y: point.y,
        }
    }
}

impl fmt::Debug for CurvePoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", fr_to_decimal(&self.x), fr_to_decimal(&self.y))
    }
}
