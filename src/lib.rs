//! Privacy-preserving toolkit for a multi-issuer PKI.
//!
//! - [`crt`]: prime pools and Chinese Remainder secret splitting used to
//!   mask certificate subjects across independent issuers.
//! - [`issuer`]: subject and issuer sides of anonymous issuance.
//! - [`vrf`]: P-384 verifiable random function with a discrete-log
//!   equality proof.
//! - [`session`]: VRF challenge-response over an authenticated connection.
//! - [`bloom`]: counting Bloom filter for revocation checks.

pub mod bigint_text;
pub mod bloom;
pub mod config;
pub mod crt;
pub mod crypto;
pub mod error;
pub mod issuer;
pub mod session;
pub mod subject;
pub mod tracing;
pub mod vrf;

pub use bloom::{BloomStats, CountingBloomFilter};
pub use crt::{CrtOperations, CrtRecord, PrimePool};
pub use error::{Error, Result};
pub use subject::SubjectName;
pub use vrf::{Challenge, VrfEngine, VrfKeyPair, VrfProof, VrfPublicKey};
