//! Additively homomorphic ElGamal over Baby Jubjub, encoding one bit as the
//! identity (0) or the base point (1).

use crate::*;
use ark_ff::{One, Zero};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElGamalCiphertext {
    pub c1: CurvePoint,
    pub c2: CurvePoint,
}

impl ElGamalCiphertext {
    pub fn points(&self) -> Result<(Point, Point), Error> {
        Ok((self.c1.to_point()?, self.c2.to_point()?))
    }

    pub fn as_array(&self) -> [Fr; 4] {
        [self.c1.x, self.c1.y, self.c2.x, self.c2.y]
    }
}

/// c1 = r*G, c2 = bit*G + r*pk
pub fn encrypt_bit(pub_key: &PubKey, bit: bool, randomness: &Scalar) -> Result<ElGamalCiphertext, Error> {
    let public = pub_key.to_point()?;
    let c1 = base_mul(randomness);
    let masked = point_mul(&public, randomness);
    let c2 = if bit {
        point_add(&base_point(), &masked)
    } else {
        masked
    };
    Ok(ElGamalCiphertext {
        c1: c1.into(),
        c2: c2.into(),
    })
}

/// The encryption of 0 with mask 1, used for padding slots
pub fn padding_ciphertext(pub_key: &PubKey) -> Result<ElGamalCiphertext, Error> {
    encrypt_bit(pub_key, false, &Scalar::one())
}

/// c2 - sk*c1 must be the identity or the base point
pub fn decrypt_bit(priv_key: &PrivKey, ciphertext: &ElGamalCiphertext) -> Result<bool, Error> {
    let (c1, c2) = ciphertext.points()?;
    let decrypted = point_sub(&c2, &point_mul(&c1, &priv_key.formatted()));

    if decrypted == identity() {
        Ok(false)
    } else if decrypted == base_point() {
        Ok(true)
    } else {
        Err(Error::InvalidCiphertext)
    }
}

/// c1' = c1 + z*G, c2' = c2 + z*pk. Decrypts to the same bit as the input.
pub fn rerandomize(
    pub_key: &PubKey,
    randomness: &Scalar,
    ciphertext: &ElGamalCiphertext,
) -> Result<ElGamalCiphertext, Error> {
    let public = pub_key.to_point()?;
    let (c1, c2) = ciphertext.points()?;
    if randomness.is_zero() {
        tracing::warn!("rerandomizing with a zero mask leaves the ciphertext linkable");
    }
    Ok(ElGamalCiphertext {
        c1: point_add(&c1, &base_mul(randomness)).into(),
        c2: point_add(&c2, &point_mul(&public, randomness)).into(),
    })
}
