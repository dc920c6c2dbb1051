//! Multi-issuer anonymous issuance.
//!
//! Subject side: collect one modulus from every issuer, split the secret over
//! the moduli, mask the canonical subject bytes and send mask and remainders
//! to the designated issuer. Issuer side: hand out moduli from a local prime
//! pool and, for the designated issuer, check that the mask reverses to the
//! subject on record before issuing a certificate under an anonymous name.

use crate::crt::{self, CrtOperations, PrimePool};
use crate::error::{Error, Result};
use crate::subject::SubjectName;
use crate::vrf::VrfPublicKey;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Masked subject identity as sent to the designated issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedIdentity {
    pub subject_id: String,
    #[serde(with = "hex::serde")]
    pub xor_result: Vec<u8>,
    #[serde(with = "crate::bigint_text::vec")]
    pub remainders: Vec<BigUint>,
    pub public_key: VrfPublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub serial: String,
    pub issuer: String,
    pub subject: SubjectName,
    pub public_key: VrfPublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceAck {
    pub issuer: String,
    pub subject_id: String,
    pub certificate: IssuedCertificate,
}

/// Remote view of one issuer.
#[async_trait::async_trait]
pub trait IssuerClient: Send + Sync {
    fn name(&self) -> &str;

    /// One prime modulus for the subject's request.
    async fn request_modulus(&self, subject_id: &str) -> Result<BigUint>;

    /// Only meaningful on the designated issuer.
    async fn submit_masked_identity(&self, identity: &MaskedIdentity) -> Result<IssuanceAck>;
}

/// Certificate layer: builds and signs the actual certificate.
pub trait CertificateIssuer: Send + Sync {
    fn issue_certificate(
        &self,
        issuer: &str,
        subject: &SubjectName,
        public_key: &VrfPublicKey,
    ) -> Result<IssuedCertificate>;
}

/// Record-only certificate layer handing out sequential 17-digit serials.
#[derive(Debug, Default)]
pub struct SerialCertificateIssuer {
    next_serial: AtomicU64,
}

impl CertificateIssuer for SerialCertificateIssuer {
    fn issue_certificate(
        &self,
        issuer: &str,
        subject: &SubjectName,
        public_key: &VrfPublicKey,
    ) -> Result<IssuedCertificate> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        Ok(IssuedCertificate {
            serial: format!("{:017}", serial),
            issuer: issuer.to_string(),
            subject: subject.clone(),
            public_key: public_key.clone(),
        })
    }
}

/// In-process issuer backed by its own prime pool.
pub struct LocalIssuer {
    name: String,
    pool: Mutex<PrimePool>,
    subjects: Mutex<HashMap<String, SubjectName>>,
    certificates: Arc<dyn CertificateIssuer>,
}

impl LocalIssuer {
    pub fn new(name: impl Into<String>, pool: PrimePool, certificates: Arc<dyn CertificateIssuer>) -> Self {
        Self {
            name: name.into(),
            pool: Mutex::new(pool),
            subjects: Mutex::new(HashMap::new()),
            certificates,
        }
    }

    /// Builds the pool with `count` primes of `bits` bits.
    pub fn with_generated_pool(
        name: impl Into<String>,
        count: usize,
        bits: u64,
        certificates: Arc<dyn CertificateIssuer>,
    ) -> Result<Self> {
        let mut pool = PrimePool::new();
        pool.generate_primes(count, bits)?;
        Ok(Self::new(name, pool, certificates))
    }

    /// Records the real subject behind `subject_id`, as vetted out of band.
    pub fn register_subject(&self, subject_id: impl Into<String>, subject: SubjectName) {
        self.subjects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subject_id.into(), subject);
    }

    pub fn pool_size(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Reversal check, then issuance under the anonymous subject.
    pub fn issue_anonymous(&self, identity: &MaskedIdentity) -> Result<IssuanceAck> {
        let expected = self
            .subjects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&identity.subject_id)
            .cloned()
            .ok_or_else(|| Error::Issuer {
                issuer: self.name.clone(),
                reason: format!("unknown subject {}", identity.subject_id),
            })?;

        let expected_bytes = expected.canonical_bytes()?;
        if let Err(err) = crt::verify_reversal(&identity.xor_result, &expected_bytes, &identity.remainders) {
            tracing::warn!(issuer = %self.name, subject_id = %identity.subject_id, error = %err, "masked identity rejected");
            return Err(err);
        }

        let anonymous = SubjectName::anonymous(&identity.xor_result);
        let certificate = self
            .certificates
            .issue_certificate(&self.name, &anonymous, &identity.public_key)?;
        tracing::info!(
            issuer = %self.name,
            subject_id = %identity.subject_id,
            serial = %certificate.serial,
            common_name = %anonymous.common_name,
            "anonymous certificate issued"
        );

        Ok(IssuanceAck {
            issuer: self.name.clone(),
            subject_id: identity.subject_id.clone(),
            certificate,
        })
    }
}

#[async_trait::async_trait]
impl IssuerClient for LocalIssuer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_modulus(&self, subject_id: &str) -> Result<BigUint> {
        let modulus = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_random_prime()?;
        tracing::debug!(issuer = %self.name, subject_id, bits = modulus.bits(), "modulus handed out");
        Ok(modulus)
    }

    async fn submit_masked_identity(&self, identity: &MaskedIdentity) -> Result<IssuanceAck> {
        self.issue_anonymous(identity)
    }
}

/// Queries every issuer concurrently. Partial results are an error.
pub async fn request_all_moduli(
    issuers: &[Arc<dyn IssuerClient>],
    subject_id: &str,
) -> Result<Vec<BigUint>> {
    let required = issuers.len();
    if required == 0 {
        return Err(Error::EmptyModuli);
    }

    let results =
        futures::future::join_all(issuers.iter().map(|issuer| issuer.request_modulus(subject_id))).await;

    let mut moduli = Vec::with_capacity(required);
    for (issuer, result) in issuers.iter().zip(results) {
        match result {
            Ok(modulus) => moduli.push(modulus),
            Err(err) => {
                tracing::warn!(issuer = issuer.name(), subject_id, error = %err, "modulus request failed");
            }
        }
    }

    if moduli.len() != required {
        return Err(Error::IncompleteModuli {
            received: moduli.len(),
            required,
        });
    }
    Ok(moduli)
}

/// Subject-side state for one anonymous certificate request.
#[derive(Debug, Clone)]
pub struct SubjectCrtSession {
    pub subject_id: String,
    pub subject: SubjectName,
    pub crt: CrtOperations,
    pub xor_result: Vec<u8>,
}

impl SubjectCrtSession {
    /// Fresh remainders, `X`, and the masked subject for the given moduli.
    pub fn prepare(subject_id: impl Into<String>, subject: SubjectName, moduli: Vec<BigUint>) -> Result<Self> {
        let mut crt = CrtOperations::new(moduli);
        crt.generate_random_remainders()?;
        crt.solve()?;
        crt.validate()?;

        let xor_result = crt.xor_with_subject_info(&subject.canonical_bytes()?)?;
        Ok(Self {
            subject_id: subject_id.into(),
            subject,
            crt,
            xor_result,
        })
    }

    pub fn masked_identity(&self, public_key: &VrfPublicKey) -> MaskedIdentity {
        MaskedIdentity {
            subject_id: self.subject_id.clone(),
            xor_result: self.xor_result.clone(),
            remainders: self.crt.remainders.clone(),
            public_key: public_key.clone(),
        }
    }
}

/// Full subject flow against `issuers`, submitting to `issuers[designated]`.
pub async fn request_anonymous_certificate(
    issuers: &[Arc<dyn IssuerClient>],
    designated: usize,
    subject_id: &str,
    subject: SubjectName,
    public_key: &VrfPublicKey,
) -> Result<(SubjectCrtSession, IssuanceAck)> {
    let target = issuers.get(designated).ok_or_else(|| {
        Error::InvalidParameter(format!(
            "designated issuer {} out of range for {} issuers",
            designated,
            issuers.len()
        ))
    })?;

    let moduli = request_all_moduli(issuers, subject_id).await?;
    let session = SubjectCrtSession::prepare(subject_id, subject, moduli)?;
    let ack = target
        .submit_masked_identity(&session.masked_identity(public_key))
        .await?;
    Ok((session, ack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vrf::VrfEngine;
    use assert_matches::assert_matches;

    struct FailingIssuer;

    #[async_trait::async_trait]
    impl IssuerClient for FailingIssuer {
        fn name(&self) -> &str {
            "offline"
        }

        async fn request_modulus(&self, _subject_id: &str) -> Result<BigUint> {
            Err(Error::Issuer {
                issuer: "offline".into(),
                reason: "connection refused".into(),
            })
        }

        async fn submit_masked_identity(&self, _identity: &MaskedIdentity) -> Result<IssuanceAck> {
            Err(Error::Issuer {
                issuer: "offline".into(),
                reason: "connection refused".into(),
            })
        }
    }

    fn small_pool(primes: &[u32]) -> PrimePool {
        let mut pool = PrimePool::new();
        for p in primes {
            assert!(pool.add_prime(BigUint::from(*p)));
        }
        pool
    }

    fn local_issuers() -> Vec<Arc<LocalIssuer>> {
        let certificates: Arc<dyn CertificateIssuer> = Arc::new(SerialCertificateIssuer::default());
        vec![
            Arc::new(LocalIssuer::new("issuer-one", small_pool(&[1_000_003]), certificates.clone())),
            Arc::new(LocalIssuer::new("issuer-two", small_pool(&[1_000_033]), certificates.clone())),
            Arc::new(LocalIssuer::new("issuer-three", small_pool(&[1_000_037]), certificates)),
        ]
    }

    fn as_clients(issuers: &[Arc<LocalIssuer>]) -> Vec<Arc<dyn IssuerClient>> {
        issuers
            .iter()
            .map(|i| i.clone() as Arc<dyn IssuerClient>)
            .collect()
    }

    #[tokio::test]
    async fn test_anonymous_issuance() {
        let issuers = local_issuers();
        let subject = SubjectName::new("alice").with_organization("Example Org");
        issuers[0].register_subject("alice-1", subject.clone());

        let keys = VrfEngine::new().generate_key_pair().unwrap();
        let (session, ack) = request_anonymous_certificate(
            &as_clients(&issuers),
            0,
            "alice-1",
            subject,
            keys.public_key(),
        )
        .await
        .unwrap();

        assert_eq!(session.crt.moduli.len(), 3);
        assert_eq!(ack.issuer, "issuer-one");
        assert_eq!(ack.certificate.serial, "00000000000000000");
        assert!(ack.certificate.subject.common_name.starts_with("anonymous-"));
        assert_eq!(&ack.certificate.public_key, keys.public_key());
    }

    #[tokio::test]
    async fn test_wrong_subject_is_rejected() {
        let issuers = local_issuers();
        issuers[0].register_subject("alice-1", SubjectName::new("alice"));

        let moduli = request_all_moduli(&as_clients(&issuers), "alice-1").await.unwrap();
        let session = SubjectCrtSession::prepare("alice-1", SubjectName::new("mallory"), moduli).unwrap();
        let keys = VrfEngine::new().generate_key_pair().unwrap();

        assert_matches!(
            issuers[0].issue_anonymous(&session.masked_identity(keys.public_key())),
            Err(Error::MaskMismatch)
        );

        let mut unknown = session.masked_identity(keys.public_key());
        unknown.subject_id = "bob-1".into();
        assert_matches!(issuers[0].issue_anonymous(&unknown), Err(Error::Issuer { .. }));
    }

    #[tokio::test]
    async fn test_partial_moduli_is_an_error() {
        let mut clients = as_clients(&local_issuers());
        clients.push(Arc::new(FailingIssuer));

        let err = request_all_moduli(&clients, "alice-1").await.unwrap_err();
        assert_matches!(err, Error::IncompleteModuli { received: 3, required: 4 });
        assert_matches!(request_all_moduli(&[], "alice-1").await, Err(Error::EmptyModuli));
    }

    #[tokio::test]
    async fn test_designated_out_of_range() {
        let clients = as_clients(&local_issuers());
        let keys = VrfEngine::new().generate_key_pair().unwrap();
        let err = request_anonymous_certificate(&clients, 3, "a", SubjectName::new("a"), keys.public_key())
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidParameter(_));
    }

    #[test]
    fn test_masked_identity_json() {
        let keys = VrfEngine::new().generate_key_pair().unwrap();
        let session = SubjectCrtSession::prepare(
            "s",
            SubjectName::new("alice"),
            vec![BigUint::from(1_000_003u32), BigUint::from(1_000_033u32)],
        )
        .unwrap();
        let identity = session.masked_identity(keys.public_key());

        let json = serde_json::to_value(&identity).unwrap();
        assert!(json["xor_result"].is_string());
        assert_eq!(json["remainders"].as_array().unwrap().len(), 2);
        let back: MaskedIdentity = serde_json::from_value(json).unwrap();
        assert_eq!(back, identity);
    }
}
