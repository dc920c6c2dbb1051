//! Multi-issuer secret splitting over the Chinese Remainder Theorem.
//!
//! A subject takes one prime modulus from each issuer, draws a random
//! remainder per modulus and reconstructs `X` with Garner's summation. The
//! remainders also mask the canonical subject bytes: each remainder's
//! big-endian bytes are XORed over the payload, cyclically repeated, one
//! remainder after the other.
//!
//! The mask is only a one-time pad when every remainder is at least as long
//! as the payload. Shorter remainders repeat across the payload, so masked
//! identities leak XOR relations between payload bytes. The scheme is kept
//! byte-for-byte for protocol compatibility.

pub mod pool;

use crate::bigint_text::{parse, to_text};
use crate::crypto::{generate_random_below, mod_inverse};
use crate::error::{Error, Result};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

pub use pool::PrimePool;

/// One subject request: moduli from the issuers, fresh remainders and `X`.
#[derive(Debug, Clone, Default)]
pub struct CrtOperations {
    pub id: i64,
    pub moduli: Vec<BigUint>,     // one per participating issuer
    pub remainders: Vec<BigUint>, // r_i in [0, n_i)
    pub x: Option<BigUint>,       // X mod prod(n_i)
}

/// String form of [`CrtOperations`] for JSON transport and storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrtRecord {
    pub id: i64,
    pub moduli: Vec<String>,
    pub remainders: Vec<String>,
    #[serde(default)]
    pub x: String,
}

impl CrtOperations {
    pub fn new(moduli: Vec<BigUint>) -> Self {
        Self {
            moduli,
            ..Default::default()
        }
    }

    pub fn with_remainders(moduli: Vec<BigUint>, remainders: Vec<BigUint>) -> Self {
        Self {
            moduli,
            remainders,
            ..Default::default()
        }
    }

    pub fn generate_random_remainders(&mut self) -> Result<()> {
        if self.moduli.is_empty() {
            return Err(Error::EmptyModuli);
        }
        self.remainders = self
            .moduli
            .iter()
            .map(generate_random_below)
            .collect::<Result<_>>()?;
        Ok(())
    }

    pub fn solve(&mut self) -> Result<&BigUint> {
        let x = solve_crt(&self.moduli, &self.remainders)?;
        Ok(&*self.x.insert(x))
    }

    pub fn xor_with_subject_info(&self, subject_info: &[u8]) -> Result<Vec<u8>> {
        if self.remainders.is_empty() {
            return Err(Error::EmptyRemainders);
        }
        Ok(xor_mask(subject_info, &self.remainders))
    }

    /// Checks the stored `X` against every congruence.
    pub fn validate(&self) -> Result<()> {
        let x = self
            .x
            .as_ref()
            .ok_or_else(|| Error::CrtValidation("X is not set".into()))?;
        validate_crt(x, &self.moduli, &self.remainders)
    }

    pub fn to_record(&self) -> CrtRecord {
        CrtRecord {
            id: self.id,
            moduli: self.moduli.iter().map(to_text).collect(),
            remainders: self.remainders.iter().map(to_text).collect(),
            x: self.x.as_ref().map(to_text).unwrap_or_default(),
        }
    }

    pub fn from_record(record: &CrtRecord) -> Result<Self> {
        let parse_all = |field: &str, values: &[String]| -> Result<Vec<BigUint>> {
            values
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    parse(s)
                        .map_err(|_| Error::InvalidInteger(format!("{}[{}]: {:?}", field, i, s)))
                })
                .collect()
        };

        let x = if record.x.is_empty() {
            None
        } else {
            Some(
                parse(&record.x)
                    .map_err(|_| Error::InvalidInteger(format!("x: {:?}", record.x)))?,
            )
        };

        Ok(Self {
            id: record.id,
            moduli: parse_all("moduli", &record.moduli)?,
            remainders: parse_all("remainders", &record.remainders)?,
            x,
        })
    }
}

/// Garner's summation: `X = (Σ r_i · M_i · (M_i⁻¹ mod n_i)) mod M`.
pub fn solve_crt(moduli: &[BigUint], remainders: &[BigUint]) -> Result<BigUint> {
    if moduli.is_empty() {
        return Err(Error::EmptyModuli);
    }
    if moduli.len() != remainders.len() {
        return Err(Error::MismatchedLengths {
            moduli: moduli.len(),
            remainders: remainders.len(),
        });
    }
    for (index, (n, r)) in moduli.iter().zip(remainders).enumerate() {
        if n < &BigUint::from(2u32) {
            return Err(Error::InvalidParameter(format!(
                "modulus {} must be greater than 1",
                index
            )));
        }
        if r >= n {
            return Err(Error::RemainderOutOfRange { index });
        }
    }

    let m: BigUint = moduli.iter().product();
    let mut x = BigUint::zero();

    for (n, r) in moduli.iter().zip(remainders) {
        let m_i = &m / n;
        let m_i_inv = mod_inverse(&m_i, n).ok_or_else(|| Error::NonCoprimeModuli {
            modulus: n.clone(),
        })?;
        x += r * &m_i * m_i_inv;
    }

    Ok(x % m)
}

/// XORs each remainder's big-endian bytes over `payload`, remainder after
/// remainder, repeating the remainder bytes across the payload length.
/// Applying the same remainders again undoes the mask.
pub fn xor_mask(payload: &[u8], remainders: &[BigUint]) -> Vec<u8> {
    let mut out = payload.to_vec();
    for remainder in remainders {
        let key = remainder.to_bytes_be();
        for (byte, k) in out.iter_mut().zip(key.iter().cycle()) {
            *byte ^= k;
        }
    }
    out
}

/// Issuer-side check: re-mask `expected_subject` with the claimed remainders
/// and compare with what the subject sent.
pub fn verify_reversal(masked: &[u8], expected_subject: &[u8], remainders: &[BigUint]) -> Result<()> {
    if remainders.is_empty() {
        return Err(Error::EmptyRemainders);
    }
    if masked.len() != expected_subject.len() || xor_mask(masked, remainders) != expected_subject {
        return Err(Error::MaskMismatch);
    }
    Ok(())
}

pub fn validate_crt(x: &BigUint, moduli: &[BigUint], remainders: &[BigUint]) -> Result<()> {
    if moduli.is_empty() || remainders.is_empty() {
        return Err(Error::CrtValidation("moduli/remainders are empty".into()));
    }
    if moduli.len() != remainders.len() {
        return Err(Error::CrtValidation(format!(
            "{} moduli but {} remainders",
            moduli.len(),
            remainders.len()
        )));
    }
    if let Some((i, j)) = first_shared_factor(moduli) {
        return Err(Error::CrtValidation(format!(
            "moduli are not pairwise coprime: gcd(n{}, n{}) != 1",
            i + 1,
            j + 1
        )));
    }

    for (i, (n, r)) in moduli.iter().zip(remainders).enumerate() {
        if n <= &BigUint::one() {
            return Err(Error::CrtValidation(format!("n{} must be > 1", i + 1)));
        }
        if r >= n {
            return Err(Error::CrtValidation(format!(
                "r{} must satisfy 0 <= r{} < n{}",
                i + 1,
                i + 1,
                i + 1
            )));
        }
        let x_mod = x % n;
        if &x_mod != r {
            return Err(Error::CrtValidation(format!(
                "congruence {} fails: X mod n{} = {}, r{} = {}",
                i + 1,
                i + 1,
                x_mod,
                i + 1,
                r
            )));
        }
    }
    Ok(())
}

fn first_shared_factor(moduli: &[BigUint]) -> Option<(usize, usize)> {
    for i in 0..moduli.len() {
        for j in i + 1..moduli.len() {
            if !moduli[i].gcd(&moduli[j]).is_one() {
                return Some((i, j));
            }
        }
    }
    None
}
