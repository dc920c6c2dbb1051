use crate::crypto::generate_prime;
use crate::error::{Error, Result};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::One;
use rand::Rng;
use rand::rngs::OsRng;
use rand::seq::index;

/// Rejected draws in a row after which `generate_primes` gives up.
pub const MAX_CONSECUTIVE_REJECTIONS: usize = 256;

/// Pool of pairwise coprime primes handed out as CRT moduli.
#[derive(Debug, Clone, Default)]
pub struct PrimePool {
    primes: Vec<BigUint>,
}

impl PrimePool {
    pub fn new() -> Self {
        Self { primes: Vec::new() }
    }

    /// Draws random `bits`-bit primes until `count` of them have been admitted.
    /// Candidates that are not coprime with the pool are dropped and redrawn.
    ///
    /// Fails with `InvalidParameter` after [`MAX_CONSECUTIVE_REJECTIONS`]
    /// rejected draws in a row, which happens when there are fewer than
    /// `count` unused primes of that length. Primes admitted before the
    /// failure stay in the pool.
    pub fn generate_primes(&mut self, count: usize, bits: u64) -> Result<()> {
        let mut added = 0;
        let mut rejected = 0usize;
        let mut streak = 0usize;
        while added < count {
            let prime = generate_prime(bits)?;
            if self.add_prime(prime) {
                added += 1;
                streak = 0;
            } else {
                rejected += 1;
                streak += 1;
                if streak >= MAX_CONSECUTIVE_REJECTIONS {
                    return Err(Error::InvalidParameter(format!(
                        "only {} of {} {}-bit primes could be added to the pool",
                        added, count, bits
                    )));
                }
            }
        }
        tracing::info!(count, bits, rejected, pool_size = self.primes.len(), "prime pool populated");
        Ok(())
    }

    pub fn is_coprime(&self, candidate: &BigUint) -> bool {
        self.primes
            .iter()
            .all(|existing| candidate.gcd(existing).is_one())
    }

    /// O(pool size) gcd check; returns whether the prime was admitted.
    pub fn add_prime(&mut self, prime: BigUint) -> bool {
        if prime < BigUint::from(2u32) || !self.is_coprime(&prime) {
            return false;
        }
        self.primes.push(prime);
        true
    }

    pub fn get_random_prime(&self) -> Result<BigUint> {
        if self.primes.is_empty() {
            return Err(Error::PoolEmpty);
        }
        let index = OsRng.gen_range(0..self.primes.len());
        Ok(self.primes[index].clone())
    }

    /// `k` primes from distinct pool slots, without replacement.
    pub fn random_moduli(&self, k: usize) -> Result<Vec<BigUint>> {
        if k == 0 {
            return Err(Error::InvalidParameter("k must be > 0".into()));
        }
        let have = self.primes.len();
        if have < k {
            return Err(Error::InsufficientPool { have, need: k });
        }
        Ok(index::sample(&mut OsRng, have, k)
            .into_iter()
            .map(|i| self.primes[i].clone())
            .collect())
    }

    pub fn primes(&self) -> &[BigUint] {
        &self.primes
    }

    pub fn len(&self) -> usize {
        self.primes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }
}
