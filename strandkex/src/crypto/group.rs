// Finite-field Diffie-Hellman domain parameters: generation and validation.
//
// Groups are Schnorr groups: a prime modulus p, a prime subgroup order q with
// q | p - 1, and a generator g of the order-q subgroup of Z_p^*.

use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};

use crate::crypto::prime::{is_probable_prime, random_prime, GENERATION_ROUNDS};
use crate::error::{KexError, Result};

/// Validation never runs fewer Miller-Rabin rounds than this.
pub const MIN_VALIDATION_ROUNDS: usize = 3;

/// Smallest subgroup order accepted by [`GroupSpec`].
pub const MIN_SUBGROUP_BITS: u64 = 32;

/// Requested sizes for parameter generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSpec {
    pub modulus_bits: u64,
    pub subgroup_bits: u64,
}

impl GroupSpec {
    /// Build a size request, rejecting sizes that cannot yield a usable group.
    pub fn new(modulus_bits: u64, subgroup_bits: u64) -> Result<Self> {
        if subgroup_bits < MIN_SUBGROUP_BITS {
            return Err(KexError::ParameterGeneration(format!(
                "subgroup order of {subgroup_bits} bits is below the {MIN_SUBGROUP_BITS}-bit minimum"
            )));
        }
        if modulus_bits < subgroup_bits + 32 {
            return Err(KexError::ParameterGeneration(format!(
                "modulus of {modulus_bits} bits leaves no room for a {subgroup_bits}-bit subgroup"
            )));
        }
        Ok(Self {
            modulus_bits,
            subgroup_bits,
        })
    }

    /// Spec for a modulus of `modulus_bits` with the conventional subgroup
    /// size: 160 bits below 2048-bit moduli, 256 bits from there on.
    pub fn for_key_size(modulus_bits: u64) -> Result<Self> {
        let subgroup_bits = if modulus_bits < 2048 { 160 } else { 256 };
        Self::new(modulus_bits, subgroup_bits)
    }
}

/// Peer-side policy for [`DomainParameters::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Miller-Rabin rounds for `p` and `q`; raised to
    /// [`MIN_VALIDATION_ROUNDS`] if configured lower.
    pub rounds: usize,
    /// Smallest modulus the peer is willing to agree over.
    pub min_modulus_bits: u64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            rounds: MIN_VALIDATION_ROUNDS,
            min_modulus_bits: 512,
        }
    }
}

/// The `(p, q, g)` triple shared by both peers for one handshake.
///
/// Construction performs no checks; a freshly decoded value must pass
/// [`DomainParameters::validate`] before it is used for key generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainParameters {
    p: BigUint,
    q: BigUint,
    g: BigUint,
}

impl DomainParameters {
    pub fn new(p: BigUint, q: BigUint, g: BigUint) -> Self {
        Self { p, q, g }
    }

    /// Prime modulus.
    pub fn p(&self) -> &BigUint {
        &self.p
    }

    /// Subgroup order.
    pub fn q(&self) -> &BigUint {
        &self.q
    }

    /// Generator of the order-`q` subgroup.
    pub fn g(&self) -> &BigUint {
        &self.g
    }

    pub fn modulus_bits(&self) -> u64 {
        self.p.bits() as u64
    }

    /// Length in bytes of an encoded public key.
    pub fn public_key_len(&self) -> usize {
        byte_len(&self.p)
    }

    /// Length in bytes of an encoded private key.
    pub fn private_key_len(&self) -> usize {
        byte_len(&self.q)
    }

    /// Length in bytes of the agreed shared secret.
    pub fn agreed_value_len(&self) -> usize {
        byte_len(&self.p)
    }

    /// Generate fresh parameters of the requested size.
    ///
    /// This is expensive (seconds for a 2048-bit modulus) and has no upper
    /// bound on its running time; async callers should run it on a blocking
    /// thread.
    pub fn generate<R>(spec: &GroupSpec, rng: &mut R) -> Result<Self>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        let spec = GroupSpec::new(spec.modulus_bits, spec.subgroup_bits)?;
        let one = BigUint::one();

        let q = random_prime(spec.subgroup_bits, rng);
        let two_q = &q << 1usize;

        // p = X - (X mod 2q) + 1 keeps p ≡ 1 (mod 2q), so q | p - 1 and p is odd.
        let mut attempts = 0u64;
        let p = loop {
            attempts += 1;
            let top_bit = BigUint::one() << (spec.modulus_bits - 1) as usize;
            let x = rng.gen_biguint(spec.modulus_bits as usize) | top_bit;
            let rem = &x % &two_q;
            let candidate = x - rem + &one;
            if candidate.bits() as u64 != spec.modulus_bits {
                continue;
            }
            if is_probable_prime(&candidate, GENERATION_ROUNDS) {
                break candidate;
            }
        };

        let cofactor = (&p - &one) / &q;
        let mut h = BigUint::from(2u32);
        let g = loop {
            let g = h.modpow(&cofactor, &p);
            if !g.is_one() {
                break g;
            }
            h += 1u32;
        };

        tracing::debug!(
            modulus_bits = spec.modulus_bits,
            subgroup_bits = spec.subgroup_bits,
            attempts,
            "generated domain parameters"
        );

        Ok(Self { p, q, g })
    }

    /// Check that `(p, q, g)` describes a prime-order subgroup of `Z_p^*`.
    ///
    /// Cheap structural checks run first so that obviously bad groups are
    /// rejected without any modular exponentiation.
    pub fn validate(&self, policy: &ValidationPolicy) -> Result<()> {
        let rounds = policy.rounds.max(MIN_VALIDATION_ROUNDS);
        let one = BigUint::one();
        let (p, q, g) = (&self.p, &self.q, &self.g);

        if p.is_even() || *p <= BigUint::from(3u32) {
            return Err(invalid_group("modulus is not an odd integer above 3".into()));
        }
        if (p.bits() as u64) < policy.min_modulus_bits {
            return Err(invalid_group(format!(
                "modulus of {} bits is below the {}-bit minimum",
                p.bits(),
                policy.min_modulus_bits
            )));
        }
        if *q <= one || q >= p {
            return Err(invalid_group(format!("subgroup order {q} is not in (1, p)")));
        }
        let p_minus_one = p - &one;
        if !(&p_minus_one % q).is_zero() {
            return Err(invalid_group(format!("subgroup order {q} does not divide p - 1")));
        }
        if *g <= one || *g >= p_minus_one {
            return Err(invalid_group("generator is not in (1, p - 1)".into()));
        }
        if !g.modpow(q, p).is_one() {
            return Err(invalid_group("generator does not have order q".into()));
        }
        if !is_probable_prime(q, rounds) {
            return Err(invalid_group(format!("subgroup order {q} is not prime")));
        }
        if !is_probable_prime(p, rounds) {
            return Err(invalid_group(format!("{}-bit modulus is not prime", p.bits())));
        }
        Ok(())
    }

    /// Check that `y` is a non-trivial element of the order-`q` subgroup.
    pub fn check_element(&self, y: &BigUint) -> Result<()> {
        let one = BigUint::one();
        if *y <= one {
            return Err(KexError::KeyAgreement(format!("public value {y} is not above 1")));
        }
        if y + &one >= self.p {
            return Err(KexError::KeyAgreement(
                "public value is not below p - 1".into(),
            ));
        }
        if !y.modpow(&self.q, &self.p).is_one() {
            return Err(KexError::KeyAgreement(
                "public value is not in the order-q subgroup".into(),
            ));
        }
        Ok(())
    }
}

fn byte_len(n: &BigUint) -> usize {
    n.bits().div_ceil(8)
}

fn invalid_group(reason: String) -> KexError {
    KexError::InvalidGroup(reason)
}
