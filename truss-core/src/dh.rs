//! Finite-field Diffie-Hellman over a freshly generated prime.
//!
//! The initiator generates a prime and base and ships both as lowercase hex;
//! the responder rebuilds them with [`DhParameters::from_hex`]. Both sides
//! then run phase 1 ([`DhParameters::generate_key_pair`]) and phase 2
//! ([`DhKeyPair::agree`]). The shared secret is fed to the session KDF as its
//! decimal text.

use num_bigint_dig::{BigUint, RandBigInt, RandPrime};
use rand::rngs::OsRng;

use crate::error::TrussError;

pub const DEFAULT_PRIME_BITS: usize = 1024;
pub const DEFAULT_BASE_BITS: usize = 128;

/// Smallest prime the responder will accept.
pub const MIN_PRIME_BITS: usize = 64;
/// Largest prime the responder will accept.
pub const MAX_PRIME_BITS: usize = 4096;

// ── DhParameters ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParameters {
    prime: BigUint,
    base: BigUint,
}

impl DhParameters {
    /// Generate a random prime of `prime_bits` and a base of up to
    /// `base_bits` in `[2, p-2]`. CPU bound; run it off the async runtime.
    ///
    /// A base wider than the prime is narrowed to `prime_bits - 1`.
    pub fn generate(prime_bits: usize, base_bits: usize) -> Result<Self, TrussError> {
        if prime_bits < MIN_PRIME_BITS {
            return Err(TrussError::InvalidDhParameter("prime too small"));
        }
        if prime_bits > MAX_PRIME_BITS {
            return Err(TrussError::InvalidDhParameter("prime too large"));
        }
        if base_bits < 2 {
            return Err(TrussError::InvalidDhParameter("base too small"));
        }
        // The prime's top bit is set, so any value below 2^(prime_bits-1)
        // is at most p-2.
        let base_bits = base_bits.min(prime_bits - 1);

        let mut rng = OsRng;
        let prime = rng.gen_prime(prime_bits);
        let upper = &prime - &BigUint::from(1u32);
        let two = BigUint::from(2u32);
        let base = loop {
            let candidate = rng.gen_biguint(base_bits);
            if candidate >= two && candidate < upper {
                break candidate;
            }
        };
        Ok(Self { prime, base })
    }

    pub fn from_hex(prime_hex: &str, base_hex: &str) -> Result<Self, TrussError> {
        let prime = BigUint::parse_bytes(prime_hex.trim().as_bytes(), 16)
            .ok_or(TrussError::InvalidDhParameter("prime is not hex"))?;
        let base = BigUint::parse_bytes(base_hex.trim().as_bytes(), 16)
            .ok_or(TrussError::InvalidDhParameter("base is not hex"))?;
        Self::new(prime, base)
    }

    pub fn new(prime: BigUint, base: BigUint) -> Result<Self, TrussError> {
        let bits = prime.bits() as usize;
        if bits < MIN_PRIME_BITS {
            return Err(TrussError::InvalidDhParameter("prime too small"));
        }
        if bits > MAX_PRIME_BITS {
            return Err(TrussError::InvalidDhParameter("prime too large"));
        }
        let upper = &prime - &BigUint::from(1u32);
        if base < BigUint::from(2u32) || base >= upper {
            return Err(TrussError::InvalidDhParameter("base outside [2, p-2]"));
        }
        Ok(Self { prime, base })
    }

    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    pub fn base(&self) -> &BigUint {
        &self.base
    }

    pub fn prime_hex(&self) -> String {
        self.prime.to_str_radix(16)
    }

    pub fn base_hex(&self) -> String {
        self.base.to_str_radix(16)
    }

    /// Phase 1: a private exponent in `[2, p-2]` and its public value.
    pub fn generate_key_pair(&self) -> DhKeyPair {
        let mut rng = OsRng;
        let low = BigUint::from(2u32);
        // gen_biguint_range excludes the upper bound.
        let high = &self.prime - &BigUint::from(1u32);
        let private = rng.gen_biguint_range(&low, &high);
        let public = self.base.modpow(&private, &self.prime);
        DhKeyPair {
            params: self.clone(),
            private,
            public,
        }
    }

    fn contains_public(&self, value: &BigUint) -> bool {
        let high = &self.prime - &BigUint::from(1u32);
        *value >= BigUint::from(2u32) && *value < high
    }
}

// ── DhKeyPair ────────────────────────────────────────────────────

pub struct DhKeyPair {
    params: DhParameters,
    private: BigUint,
    public: BigUint,
}

impl DhKeyPair {
    pub fn public_key(&self) -> &BigUint {
        &self.public
    }

    pub fn public_hex(&self) -> String {
        self.public.to_str_radix(16)
    }

    /// Phase 2: `peer^private mod p`, rejecting peers outside `[2, p-2]`.
    pub fn agree(&self, peer_public: &BigUint) -> Result<SharedSecret, TrussError> {
        if !self.params.contains_public(peer_public) {
            return Err(TrussError::InvalidPublicKey);
        }
        Ok(SharedSecret(
            peer_public.modpow(&self.private, &self.params.prime),
        ))
    }

    pub fn agree_hex(&self, peer_hex: &str) -> Result<SharedSecret, TrussError> {
        let peer = BigUint::parse_bytes(peer_hex.trim().as_bytes(), 16)
            .ok_or(TrussError::InvalidPublicKey)?;
        self.agree(&peer)
    }
}

impl std::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

// ── SharedSecret ─────────────────────────────────────────────────

#[derive(PartialEq, Eq)]
pub struct SharedSecret(BigUint);

impl SharedSecret {
    /// The text handed to the session KDF.
    pub fn to_decimal(&self) -> String {
        self.0.to_str_radix(10)
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}
