//! Symmetric encryption of field element vectors under an ECDH shared key.
//!
//! The ciphertext is `[iv, c_1 .. c_n]` with `c_i = p_i + k_i` and the
//! keystream `k_i = hash3(key.x, key.y, iv + i)`. Decryption cannot fail:
//! the wrong key just produces a different vector of the same length.

use crate::*;

/// Encrypt with the plaintext's own hash as the iv
pub fn encrypt(plaintext: &[Fr], key: &SharedKey) -> Vec<Fr> {
    encrypt_with_nonce(plaintext, key, hash_n(plaintext))
}

pub fn encrypt_with_nonce(plaintext: &[Fr], key: &SharedKey, iv: Fr) -> Vec<Fr> {
    let mut ciphertext = Vec::with_capacity(plaintext.len() + 1);
    ciphertext.push(iv);
    for (i, p) in plaintext.iter().enumerate() {
        ciphertext.push(*p + keystream(key, iv, i));
    }
    ciphertext
}

pub fn decrypt(ciphertext: &[Fr], key: &SharedKey) -> Vec<Fr> {
    let (iv, body) = match ciphertext.split_first() {
        Some((iv, body)) => (*iv, body),
        None => return Vec::new(),
    };
    body.iter()
        .enumerate()
        .map(|(i, c)| *c - keystream(key, iv, i))
        .collect()
}

fn keystream(key: &SharedKey, iv: Fr, i: usize) -> Fr {
    hash3(key.0.x, key.0.y, iv + Fr::from(i as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn shared_keys(seed: u64) -> (SharedKey, SharedKey) {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let user = Keypair::new(&mut rng);
        let coordinator = Keypair::new(&mut rng);
        let other = Keypair::new(&mut rng);
        (
            derive_shared_key(&user.priv_key, &coordinator.pub_key).unwrap(),
            derive_shared_key(&other.priv_key, &coordinator.pub_key).unwrap(),
        )
    }

    #[test]
    fn test_round_trip() {
        let (key, _) = shared_keys(20);
        let plaintext: Vec<Fr> = (0..7u64).map(Fr::from).collect();
        let ciphertext = encrypt(&plaintext, &key);
        assert_eq!(ciphertext.len(), 8);
        assert_ne!(&ciphertext[1..], &plaintext[..]);
        assert_eq!(decrypt(&ciphertext, &key), plaintext);
    }

    #[test]
    fn test_wrong_key_yields_garbage_not_error() {
        let (key, wrong) = shared_keys(21);
        let plaintext = vec![Fr::from(1u64), Fr::from(2u64)];
        let ciphertext = encrypt(&plaintext, &key);
        let garbage = decrypt(&ciphertext, &wrong);
        assert_eq!(garbage.len(), 2);
        assert_ne!(garbage, plaintext);
        assert!(decrypt(&[], &key).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_round_trip(values in proptest::collection::vec(any::<u64>(), 0..10), seed in any::<u64>()) {
            let (key, _) = shared_keys(seed);
            let plaintext: Vec<Fr> = values.into_iter().map(Fr::from).collect();
            prop_assert_eq!(decrypt(&encrypt(&plaintext, &key), &key), plaintext);
        }
    }
}
