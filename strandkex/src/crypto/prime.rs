// Probable-prime testing and random prime generation.
//
// Both are num-bigint-dig's `prime` module: Miller-Rabin with the requested
// number of rounds followed by a Baillie-PSW check.

use num_bigint::prime::probably_prime;
use num_bigint::{BigUint, RandPrime};
use rand::{CryptoRng, RngCore};

/// Miller-Rabin rounds used when *generating* primes.
pub const GENERATION_ROUNDS: usize = 20;

/// Returns `true` if `n` is probably prime after `rounds` Miller-Rabin
/// rounds.
pub fn is_probable_prime(n: &BigUint, rounds: usize) -> bool {
    probably_prime(n, rounds)
}

/// Draw a random probable prime of exactly `bits` bits.
///
/// `bits` must be at least 2.
pub fn random_prime<R>(bits: u64, rng: &mut R) -> BigUint
where
    R: RngCore + CryptoRng + ?Sized,
{
    rng.gen_prime(bits as usize)
}
