use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Distinguished name of a certificate subject.
///
/// The JSON form produced by [`SubjectName::canonical_bytes`] is the payload
/// that gets masked, so field order and names are part of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubjectName {
    pub country: Vec<String>,
    pub organization: Vec<String>,
    pub organizational_unit: Vec<String>,
    pub locality: Vec<String>,
    pub province: Vec<String>,
    pub common_name: String,
}

impl SubjectName {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            ..Default::default()
        }
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization.push(organization.into());
        self
    }

    pub fn with_organizational_unit(mut self, unit: impl Into<String>) -> Self {
        self.organizational_unit.push(unit.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country.push(country.into());
        self
    }

    pub fn with_province(mut self, province: impl Into<String>) -> Self {
        self.province.push(province.into());
        self
    }

    pub fn with_locality(mut self, locality: impl Into<String>) -> Self {
        self.locality.push(locality.into());
        self
    }

    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Subject placed in the issued certificate instead of the real one.
    /// The common name is derived from the masked identity only.
    pub fn anonymous(masked_identity: &[u8]) -> Self {
        let digest = Sha256::digest(masked_identity);
        Self::new(format!("anonymous-{}", hex::encode(&digest[..16])))
            .with_organization("Anonymous Organization")
            .with_organizational_unit("Anonymous Department")
            .with_country("AN")
            .with_province("Anonymous Province")
            .with_locality("Anonymous Locality")
    }
}
