use crate::error::{Error, Result};
use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;

const MILLER_RABIN_ROUNDS: usize = 40;

const SMALL_PRIMES: [u32; 24] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Uniform integer in `[0, bound)`.
pub fn generate_random_below(bound: &BigUint) -> Result<BigUint> {
    if bound.is_zero() {
        return Err(Error::InvalidParameter("random bound must be positive".into()));
    }
    let mut rng = OsRng;
    Ok(rng.gen_biguint_below(bound))
}

/// Random prime with exactly `bits` bits (top bit set).
pub fn generate_prime(bits: u64) -> Result<BigUint> {
    if bits < 2 {
        return Err(Error::InvalidParameter(format!(
            "prime bit length must be at least 2, got {}",
            bits
        )));
    }
    let mut rng = OsRng;
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);

        if is_probably_prime(&candidate, MILLER_RABIN_ROUNDS) {
            return Ok(candidate);
        }
    }
}

// Miller-Rabin with a small-prime sieve in front
pub fn is_probably_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    if n == &two {
        return true;
    }
    if n.is_even() {
        return false;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // Write n-1 as d * 2^r
    let n_minus_1 = n - 1u32;
    let mut d = n_minus_1.clone();
    let mut r = 0u32;
    while d.is_even() {
        d >>= 1;
        r += 1;
    }

    let mut rng = OsRng;

    'witness_loop: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_1);
        let mut x = a.modpow(&d, n);

        if x.is_one() || x == n_minus_1 {
            continue 'witness_loop;
        }

        for _ in 0..r - 1 {
            x = x.modpow(&two, n);
            if x == n_minus_1 {
                continue 'witness_loop;
            }
        }
        return false;
    }
    true
}

/// Inverse of `a` modulo `m` via the extended Euclidean algorithm.
/// `None` when `gcd(a, m) != 1`.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    if m.is_zero() {
        return None;
    }
    if m.is_one() {
        return Some(BigUint::zero());
    }
    let a = BigInt::from_biguint(Sign::Plus, a % m);
    let m = BigInt::from_biguint(Sign::Plus, m.clone());

    let egcd = a.extended_gcd(&m);
    if !egcd.gcd.is_one() {
        return None;
    }
    egcd.x.mod_floor(&m).to_biguint()
}

/// Square root of `a` modulo the odd prime `p`, if `a` is a quadratic residue.
pub fn mod_sqrt(a: &BigUint, p: &BigUint) -> Option<BigUint> {
    let a = a % p;
    if a.is_zero() {
        return Some(BigUint::zero());
    }
    if p == &BigUint::from(2u32) {
        return Some(a);
    }

    // Euler's criterion
    let p_minus_1 = p - 1u32;
    let legendre_exp = &p_minus_1 >> 1;
    if !a.modpow(&legendre_exp, p).is_one() {
        return None;
    }

    if (p % 4u32) == BigUint::from(3u32) {
        let exp = (p + 1u32) >> 2;
        return Some(a.modpow(&exp, p));
    }

    tonelli_shanks(&a, p)
}

// general case, p ≡ 1 (mod 4); `a` is already known to be a residue
fn tonelli_shanks(a: &BigUint, p: &BigUint) -> Option<BigUint> {
    let p_minus_1 = p - 1u32;
    let legendre_exp = &p_minus_1 >> 1;

    // p - 1 = q * 2^s with q odd
    let mut q = p_minus_1.clone();
    let mut s = 0usize;
    while q.is_even() {
        q >>= 1;
        s += 1;
    }

    let mut z = BigUint::from(2u32);
    while z.modpow(&legendre_exp, p) != p_minus_1 {
        z += 1u32;
    }

    let mut m = s;
    let mut c = z.modpow(&q, p);
    let mut t = a.modpow(&q, p);
    let mut r = a.modpow(&((&q + 1u32) >> 1), p);

    while !t.is_one() {
        // least i in (0, m) with t^(2^i) == 1
        let mut i = 0usize;
        let mut t2i = t.clone();
        while !t2i.is_one() {
            t2i = (&t2i * &t2i) % p;
            i += 1;
            if i == m {
                return None;
            }
        }

        let b = c.modpow(&(BigUint::one() << (m - i - 1)), p);
        m = i;
        c = (&b * &b) % p;
        t = (&t * &c) % p;
        r = (&r * &b) % p;
    }
    Some(r)
}
