// Ephemeral key pairs and key agreement over a finite-field DH group.

use std::fmt;

use hkdf::Hkdf;
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::codec::{decode_key, encode_key};
use crate::crypto::group::DomainParameters;
use crate::error::{KexError, Result};

/// A peer's ephemeral key pair for one handshake.
///
/// Both halves are stored big-endian and left zero-padded to the lengths
/// fixed by the group: `private_key_len()` and `public_key_len()`.
pub struct KeyPair {
    private_key: Zeroizing<Vec<u8>>,
    public_key: Vec<u8>,
}

impl KeyPair {
    /// Draw a private exponent uniformly from `[1, q - 1]` and derive
    /// `g^x mod p`.
    pub fn generate<R>(params: &DomainParameters, rng: &mut R) -> Result<Self>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        if *params.q() <= BigUint::one() {
            return Err(KexError::KeyAgreement(
                "subgroup order leaves no valid private exponent".into(),
            ));
        }
        let x = rng.gen_biguint_range(&BigUint::one(), params.q());
        Self::from_exponent(params, &x)
    }

    /// Rebuild a key pair from an encoded private key (used in deterministic
    /// tests).
    pub fn from_private_bytes(params: &DomainParameters, private_key: &[u8]) -> Result<Self> {
        let x = decode_key(private_key);
        Self::from_exponent(params, &x)
    }

    fn from_exponent(params: &DomainParameters, x: &BigUint) -> Result<Self> {
        check_modulus(params)?;
        check_exponent(params, x)?;
        let y = params.g().modpow(x, params.p());
        Ok(Self {
            private_key: Zeroizing::new(encode_key(x, params.private_key_len())?),
            public_key: encode_key(&y, params.public_key_len())?,
        })
    }

    /// The encoded public key, as sent on the wire.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }

    /// The encoded private key. Never leaves the owning peer.
    pub fn private_key_bytes(&self) -> &[u8] {
        &self.private_key
    }

    /// Agree a secret with the holder of `peer_public_key`.
    pub fn agree(&self, params: &DomainParameters, peer_public_key: &[u8]) -> Result<SharedSecret> {
        compute_secret(params, &self.private_key, peer_public_key)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key_len", &self.public_key.len())
            .finish()
    }
}

/// Compute `peer_public_key ^ private_key mod p`.
///
/// The peer's value is range- and subgroup-checked before any exponentiation
/// with the private key takes place.
pub fn compute_secret(
    params: &DomainParameters,
    private_key: &[u8],
    peer_public_key: &[u8],
) -> Result<SharedSecret> {
    if peer_public_key.len() != params.public_key_len() {
        return Err(KexError::KeyAgreement(format!(
            "peer public key is {} bytes, expected {}",
            peer_public_key.len(),
            params.public_key_len()
        )));
    }
    check_modulus(params)?;
    let y = decode_key(peer_public_key);
    params.check_element(&y)?;

    let x = decode_key(private_key);
    check_exponent(params, &x)?;

    let z = y.modpow(&x, params.p());
    if z <= BigUint::one() {
        return Err(KexError::KeyAgreement("agreed value is degenerate".into()));
    }
    Ok(SharedSecret {
        bytes: Zeroizing::new(encode_key(&z, params.agreed_value_len())?),
    })
}

// modpow panics on a zero modulus; unvalidated groups can reach here.
fn check_modulus(params: &DomainParameters) -> Result<()> {
    if *params.p() <= BigUint::one() {
        return Err(KexError::KeyAgreement("modulus must be greater than 1".into()));
    }
    Ok(())
}

fn check_exponent(params: &DomainParameters, x: &BigUint) -> Result<()> {
    if *x < BigUint::one() || x >= params.q() {
        return Err(KexError::KeyAgreement(
            "private exponent is not in [1, q - 1]".into(),
        ));
    }
    Ok(())
}

/// The agreed value `g^(ab) mod p`, fixed at `agreed_value_len()` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret {
    bytes: Zeroizing<Vec<u8>>,
}

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex of the first 8 bytes of SHA-256 over the secret. Safe to log and
    /// compare out of band.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes.as_slice());
        hex::encode(&digest[..8])
    }

    /// Derive a 32-byte symmetric key bound to `label`.
    ///
    /// ```text
    /// prk = HKDF-Extract(salt=0, ikm=secret)
    /// key = HKDF-Expand(prk, label, 32)
    /// ```
    pub fn derive_key(&self, label: &[u8]) -> Result<[u8; 32]> {
        let salt = [0u8; 32];
        let hk = Hkdf::<Sha256>::new(Some(&salt), &self.bytes);
        let mut key = [0u8; 32];
        hk.expand(label, &mut key)
            .map_err(|e| KexError::KeyAgreement(format!("HKDF expand error: {e}")))?;
        Ok(key)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("len", &self.bytes.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::group::GroupSpec;
    use rand::rngs::OsRng;

    fn group() -> DomainParameters {
        DomainParameters::generate(&GroupSpec::new(256, 64).unwrap(), &mut OsRng).unwrap()
    }

    #[test]
    fn test_dh_shared_secret_matches() {
        let params = group();
        let alice = KeyPair::generate(&params, &mut OsRng).unwrap();
        let bob = KeyPair::generate(&params, &mut OsRng).unwrap();

        let alice_shared = alice.agree(&params, bob.public_key_bytes()).unwrap();
        let bob_shared = bob.agree(&params, alice.public_key_bytes()).unwrap();
        assert_eq!(alice_shared, bob_shared);
        assert_eq!(alice_shared.len(), params.agreed_value_len());
    }

    #[test]
    fn test_key_lengths_fixed_by_group() {
        let params = group();
        for _ in 0..8 {
            let kp = KeyPair::generate(&params, &mut OsRng).unwrap();
            assert_eq!(kp.public_key_bytes().len(), params.public_key_len());
            assert_eq!(kp.private_key_bytes().len(), params.private_key_len());
        }
    }

    #[test]
    fn test_from_private_bytes_roundtrip() {
        let params = group();
        let kp = KeyPair::generate(&params, &mut OsRng).unwrap();
        let kp2 = KeyPair::from_private_bytes(&params, kp.private_key_bytes()).unwrap();
        assert_eq!(kp.public_key_bytes(), kp2.public_key_bytes());
    }

    #[test]
    fn test_zero_private_key_rejected() {
        let params = group();
        let zero = vec![0u8; params.private_key_len()];
        assert!(KeyPair::from_private_bytes(&params, &zero).is_err());
    }

    #[test]
    fn test_degenerate_modulus_rejected() {
        for p in [0u32, 1] {
            let params =
                DomainParameters::new(BigUint::from(p), BigUint::from(5u32), BigUint::from(2u32));
            assert!(matches!(
                KeyPair::generate(&params, &mut OsRng),
                Err(KexError::KeyAgreement(_))
            ));
            let peer_key = vec![0u8; params.public_key_len()];
            assert!(matches!(
                compute_secret(&params, &[1], &peer_key),
                Err(KexError::KeyAgreement(_))
            ));
        }
    }

    #[test]
    fn test_derive_key_deterministic() {
        let params = group();
        let alice = KeyPair::generate(&params, &mut OsRng).unwrap();
        let bob = KeyPair::generate(&params, &mut OsRng).unwrap();
        let shared = alice.agree(&params, bob.public_key_bytes()).unwrap();

        let k1 = shared.derive_key(b"strand session").unwrap();
        let k2 = shared.derive_key(b"strand session").unwrap();
        let other = shared.derive_key(b"strand other").unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1, other);
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let params = group();
        let kp = KeyPair::generate(&params, &mut OsRng).unwrap();
        let rendered = format!("{kp:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&hex::encode(kp.private_key_bytes())));
    }
}
