//! Verifiable random function on NIST P-384.
//!
//! The holder proves that `gamma = x·H(alpha)` was computed with the secret
//! scalar `x` behind its public key, using a Schnorr proof of discrete-log
//! equality made non-interactive with Fiat-Shamir. `beta = H(gamma)` is the
//! VRF output.

pub mod crypto;

use crate::error::{Error, Result};
use num_bigint::BigUint;
use p384::elliptic_curve::sec1::ToEncodedPoint;
use p384::{NonZeroScalar, ProjectivePoint, PublicKey};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub use crypto::{CurveParams, HASH_TO_CURVE_ATTEMPTS};

/// Affine point with coordinates as canonical integer text on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcPoint {
    #[serde(with = "crate::bigint_text")]
    pub x: BigUint,
    #[serde(with = "crate::bigint_text")]
    pub y: BigUint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VrfPublicKey {
    point: EcPoint,
}

#[derive(Clone)]
pub struct VrfKeyPair {
    pub public: VrfPublicKey,
    secret: NonZeroScalar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub random_seed: String, // hex of 32 random bytes
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "hex::serde")]
    pub final_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfProof {
    pub gamma: EcPoint, // x·h
    #[serde(with = "crate::bigint_text")]
    pub c: BigUint, // transcript hash mod n
    #[serde(with = "crate::bigint_text")]
    pub s: BigUint, // k + c·x mod n
    #[serde(with = "hex::serde")]
    pub beta: Vec<u8>, // H(gamma)
}

impl VrfPublicKey {
    pub fn from_point(point: EcPoint) -> Result<Self> {
        crypto::to_affine(&point)?;
        Ok(Self { point })
    }

    /// SEC1 encoding, compressed or not, as found in a peer certificate.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        let key = PublicKey::from_sec1_bytes(bytes).map_err(|_| Error::InvalidPoint)?;
        let point = crypto::from_projective(&key.to_projective())?;
        Ok(Self { point })
    }

    pub fn to_sec1_bytes(&self) -> Result<Vec<u8>> {
        let affine = crypto::to_affine(&self.point)?;
        Ok(affine.to_encoded_point(false).as_bytes().to_vec())
    }

    pub fn point(&self) -> &EcPoint {
        &self.point
    }
}

impl VrfKeyPair {
    pub fn public_key(&self) -> &VrfPublicKey {
        &self.public
    }
}

impl fmt::Debug for VrfKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VrfKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl Challenge {
    /// Recomputes `final_hash` from the seed, timestamp and session id.
    pub fn is_consistent(&self) -> Result<bool> {
        let timestamp = self.timestamp.format(&Rfc3339)?;
        Ok(crypto::challenge_hash(&self.random_seed, &timestamp, &self.session_id) == self.final_hash)
    }
}

#[derive(Debug, Clone)]
pub struct VrfEngine {
    pub params: CurveParams,
}

impl Default for VrfEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VrfEngine {
    pub fn new() -> Self {
        Self {
            params: CurveParams::p384(),
        }
    }

    pub fn generate_key_pair(&self) -> Result<VrfKeyPair> {
        let secret = NonZeroScalar::random(&mut OsRng);
        let point = crypto::from_projective(&(ProjectivePoint::GENERATOR * *secret))?;
        Ok(VrfKeyPair {
            public: VrfPublicKey { point },
            secret,
        })
    }

    pub fn generate_challenge(&self, session_id: &str) -> Result<Challenge> {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let random_seed = hex::encode(seed);
        let timestamp = OffsetDateTime::now_utc();

        let final_hash =
            crypto::challenge_hash(&random_seed, &timestamp.format(&Rfc3339)?, session_id);

        Ok(Challenge {
            random_seed,
            session_id: session_id.to_string(),
            timestamp,
            final_hash,
        })
    }

    pub fn hash_to_curve(&self, alpha: &[u8]) -> Result<EcPoint> {
        crypto::hash_to_curve(&self.params, alpha)
    }

    pub fn generate_proof(&self, key_pair: &VrfKeyPair, challenge: &Challenge) -> Result<VrfProof> {
        let alpha = &challenge.final_hash;
        let h_point = self.hash_to_curve(alpha)?;
        let h = ProjectivePoint::from(crypto::to_affine(&h_point)?);

        let x = *key_pair.secret;
        let gamma = crypto::from_projective(&(h * x))?;
        let beta = crypto::hash_point(&gamma);

        let k = *NonZeroScalar::random(&mut OsRng);
        let r1 = crypto::from_projective(&(ProjectivePoint::GENERATOR * k))?;
        let r2 = crypto::from_projective(&(h * k))?;

        let c = crypto::transcript_challenge(
            &self.params,
            [&h_point, key_pair.public.point(), &gamma, &r1, &r2],
            alpha,
        );
        let s = k + crypto::to_scalar(&c)? * x;

        Ok(VrfProof {
            gamma,
            c,
            s: crypto::from_scalar(&s),
            beta,
        })
    }

    /// Any failure, including malformed points or scalars in the proof,
    /// is reported as `InvalidProof`.
    pub fn verify_proof(
        &self,
        public_key: &VrfPublicKey,
        challenge: &Challenge,
        proof: &VrfProof,
    ) -> Result<()> {
        let result = self.check_proof(public_key, challenge, proof);
        if let Err(ref err) = result {
            tracing::debug!(session_id = %challenge.session_id, error = %err, "proof rejected");
        }
        result.map_err(|_| Error::InvalidProof)
    }

    fn check_proof(
        &self,
        public_key: &VrfPublicKey,
        challenge: &Challenge,
        proof: &VrfProof,
    ) -> Result<()> {
        if crypto::hash_point(&proof.gamma) != proof.beta {
            return Err(Error::InvalidProof);
        }

        let alpha = &challenge.final_hash;
        let h_point = self.hash_to_curve(alpha)?;
        let h = ProjectivePoint::from(crypto::to_affine(&h_point)?);
        let pk = ProjectivePoint::from(crypto::to_affine(public_key.point())?);
        let gamma = ProjectivePoint::from(crypto::to_affine(&proof.gamma)?);
        let c = crypto::to_scalar(&proof.c)?;
        let s = crypto::to_scalar(&proof.s)?;

        let r1 = crypto::from_projective(&(ProjectivePoint::GENERATOR * s - pk * c))?;
        let r2 = crypto::from_projective(&(h * s - gamma * c))?;

        let expected = crypto::transcript_challenge(
            &self.params,
            [&h_point, public_key.point(), &proof.gamma, &r1, &r2],
            alpha,
        );
        if expected != proof.c {
            return Err(Error::InvalidProof);
        }
        Ok(())
    }
}
