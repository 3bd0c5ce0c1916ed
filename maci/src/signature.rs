use crate::*;
use ark_ff::{BigInteger, PrimeField};
use sha2::{Digest, Sha512};

/// EdDSA signature over Baby Jubjub with a Poseidon challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    pub r8: CurvePoint,

    #[serde(with = "serde_field")]
    pub s: Fr,
}

impl Signature {
    pub fn sign(priv_key: &PrivKey, msg: Fr) -> Signature {
        let secret = priv_key.formatted();
        let public = base_mul(&secret);

        let mut hasher = Sha512::new();
        hasher.update(&priv_key.nonce_prefix());
        hasher.update(&msg.into_bigint().to_bytes_le());
        let r = Scalar::from_le_bytes_mod_order(&hasher.finalize());
        let r8 = base_mul(&r);

        let c = challenge(&r8.into(), &public.into(), msg);
        let s = r + c * secret;

        Signature {
            r8: r8.into(),
            s: scalar_to_fr(&s),
        }
    }

    /// Verify against a public key. Never fails: anything malformed is simply invalid.
    pub fn verify(&self, msg: Fr, pub_key: &PubKey) -> bool {
        if !fr_is_canonical_scalar(&self.s) {
            return false;
        }
        let r8 = match self.r8.to_point() {
            Ok(point) => point,
            Err(_) => return false,
        };
        let public = match pub_key.to_point() {
            Ok(point) => point,
            Err(_) => return false,
        };

        let c = challenge(&self.r8, &pub_key.0, msg);
        let lhs = base_mul(&fr_to_scalar(&self.s));
        let rhs = point_add(&r8, &point_mul(&public, &c));
        lhs == rhs
    }
}

fn challenge(r8: &CurvePoint, public: &CurvePoint, msg: Fr) -> Scalar {
    fr_to_scalar(&hash5([r8.x, r8.y, public.x, public.y, msg]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_sign_and_verify() {
        let mut rng = ChaCha20Rng::seed_from_u64(10);
        let keypair = Keypair::new(&mut rng);
        let msg = Fr::from(1234u64);

        let sig = Signature::sign(&keypair.priv_key, msg);
        assert!(sig.verify(msg, &keypair.pub_key));
        assert!(!sig.verify(msg + Fr::from(1u64), &keypair.pub_key));

        let other = Keypair::new(&mut rng);
        assert!(!sig.verify(msg, &other.pub_key));
        assert!(!sig.verify(msg, &PubKey::zero()));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let keypair = Keypair::new(&mut rng);
        let msg = Fr::from(99u64);
        assert_eq!(
            Signature::sign(&keypair.priv_key, msg),
            Signature::sign(&keypair.priv_key, msg)
        );
    }

    #[test]
    fn test_malformed_signatures() {
        let mut rng = ChaCha20Rng::seed_from_u64(12);
        let keypair = Keypair::new(&mut rng);
        let msg = Fr::from(5u64);
        let sig = Signature::sign(&keypair.priv_key, msg);

        let mut off_curve = sig;
        off_curve.r8.x += Fr::from(1u64);
        assert!(!off_curve.verify(msg, &keypair.pub_key));

        // S + l is the same scalar mod l, but is not canonical
        let order = Fr::from_le_bytes_mod_order(&Scalar::MODULUS.to_bytes_le());
        let mut malleable = sig;
        malleable.s += order;
        assert!(!malleable.verify(msg, &keypair.pub_key));

        assert!(!Signature::default().verify(msg, &keypair.pub_key));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_bit_flip_in_s_invalidates(seed in any::<u64>(), bit in 0usize..250) {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let keypair = Keypair::new(&mut rng);
            let msg = gen_random_salt(&mut rng);
            let sig = Signature::sign(&keypair.priv_key, msg);
            prop_assert!(sig.verify(msg, &keypair.pub_key));

            let mut bits = sig.s.into_bigint();
            let limb = bit / 64;
            bits.0[limb] ^= 1u64 << (bit % 64);
            let mut flipped = sig;
            flipped.s = Fr::from_le_bytes_mod_order(&bits.to_bytes_le());
            prop_assert!(!flipped.verify(msg, &keypair.pub_key));
        }
    }
}
