use super::EcPoint;
use crate::crypto::mod_sqrt;
use crate::error::{Error, Result};
use hex_literal::hex;
use num_bigint::BigUint;
use p384::elliptic_curve::PrimeField;
use p384::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p384::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use sha2::{Digest, Sha256};

pub const HASH_TO_CURVE_ATTEMPTS: usize = 256;

const FIELD_BYTES: usize = 48;

// NIST P-384 domain parameters, big-endian
const P: [u8; FIELD_BYTES] = hex!(
    "fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffeffffffff0000000000000000ffffffff"
);
const B: [u8; FIELD_BYTES] = hex!(
    "b3312fa7e23ee7e4988e056be3f82d19181d9c6efe8141120314088f5013875ac656398d8a2ed19d2a85c8edd3ec2aef"
);
const N: [u8; FIELD_BYTES] = hex!(
    "ffffffffffffffffffffffffffffffffffffffffffffffffc7634d81f4372ddf581a0db248b0a77aecec196accc52973"
);
const GX: [u8; FIELD_BYTES] = hex!(
    "aa87ca22be8b05378eb1c71ef320ad746e1d3b628ba79b9859f741e082542a385502f25dbf55296c3a545e3872760ab7"
);
const GY: [u8; FIELD_BYTES] = hex!(
    "3617de4a96262c6f5d9e98bf9292dc29f8f41dbd289a147ce9da3113b5f0b8c00a60b1ce1d7e819d7a431d7c90ea0e5f"
);

/// Short Weierstrass parameters `y² = x³ − 3x + b` over `F_p`, group order `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurveParams {
    pub p: BigUint,
    pub b: BigUint,
    pub n: BigUint,
    pub generator: EcPoint,
}

impl CurveParams {
    pub fn p384() -> Self {
        Self {
            p: BigUint::from_bytes_be(&P),
            b: BigUint::from_bytes_be(&B),
            n: BigUint::from_bytes_be(&N),
            generator: EcPoint {
                x: BigUint::from_bytes_be(&GX),
                y: BigUint::from_bytes_be(&GY),
            },
        }
    }

    // x³ − 3x + b mod p
    pub fn curve_rhs(&self, x: &BigUint) -> BigUint {
        let x3 = x.modpow(&BigUint::from(3u32), &self.p);
        let three_x = (x * 3u32) % &self.p;
        (x3 + &self.p - three_x + &self.b) % &self.p
    }

    pub fn is_on_curve(&self, point: &EcPoint) -> bool {
        if point.x >= self.p || point.y >= self.p {
            return false;
        }
        (&point.y * &point.y) % &self.p == self.curve_rhs(&point.x)
    }
}

/// finalHash = SHA-256(seed ‖ timestamp ‖ session id)
pub fn challenge_hash(random_seed: &str, timestamp: &str, session_id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(random_seed.as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(session_id.as_bytes());
    hasher.finalize().to_vec()
}

/// Try-and-increment: the first `SHA-256(alpha ‖ i)` that is the x-coordinate
/// of a curve point, for `i` in `0..256`.
pub fn hash_to_curve(params: &CurveParams, alpha: &[u8]) -> Result<EcPoint> {
    for i in 0..HASH_TO_CURVE_ATTEMPTS {
        let mut hasher = Sha256::new();
        hasher.update(alpha);
        hasher.update([i as u8]);
        let x = BigUint::from_bytes_be(&hasher.finalize());
        if x >= params.p {
            continue;
        }

        let y2 = params.curve_rhs(&x);
        if let Some(y) = mod_sqrt(&y2, &params.p) {
            let point = EcPoint { x, y };
            if params.is_on_curve(&point) {
                return Ok(point);
            }
        }
    }
    Err(Error::HashToCurveExhausted(HASH_TO_CURVE_ATTEMPTS))
}

/// beta = SHA-256(x ‖ y), coordinates in minimal big-endian form.
pub fn hash_point(point: &EcPoint) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(point.x.to_bytes_be());
    hasher.update(point.y.to_bytes_be());
    hasher.finalize().to_vec()
}

/// Fiat-Shamir challenge over `G, h, pk, gamma, r1, r2, alpha`, reduced mod n.
pub fn transcript_challenge(params: &CurveParams, points: [&EcPoint; 5], alpha: &[u8]) -> BigUint {
    let mut hasher = Sha256::new();
    hasher.update(params.generator.x.to_bytes_be());
    hasher.update(params.generator.y.to_bytes_be());
    for point in points {
        hasher.update(point.x.to_bytes_be());
        hasher.update(point.y.to_bytes_be());
    }
    hasher.update(alpha);
    BigUint::from_bytes_be(&hasher.finalize()) % &params.n
}

fn field_bytes(value: &BigUint) -> Option<FieldBytes> {
    let bytes = value.to_bytes_be();
    if bytes.len() > FIELD_BYTES {
        return None;
    }
    let mut buf = FieldBytes::default();
    buf[FIELD_BYTES - bytes.len()..].copy_from_slice(&bytes);
    Some(buf)
}

/// Rejects coordinates that do not name a finite curve point.
pub fn to_affine(point: &EcPoint) -> Result<AffinePoint> {
    let x = field_bytes(&point.x).ok_or(Error::InvalidPoint)?;
    let y = field_bytes(&point.y).ok_or(Error::InvalidPoint)?;
    let encoded = EncodedPoint::from_affine_coordinates(&x, &y, false);
    Option::from(AffinePoint::from_encoded_point(&encoded)).ok_or(Error::InvalidPoint)
}

/// Fails on the point at infinity, which has no affine coordinates.
pub fn from_projective(point: &ProjectivePoint) -> Result<EcPoint> {
    let encoded = point.to_affine().to_encoded_point(false);
    match (encoded.x(), encoded.y()) {
        (Some(x), Some(y)) => Ok(EcPoint {
            x: BigUint::from_bytes_be(x),
            y: BigUint::from_bytes_be(y),
        }),
        _ => Err(Error::InvalidPoint),
    }
}

/// Scalars must already be reduced: `0 <= value < n`.
pub fn to_scalar(value: &BigUint) -> Result<Scalar> {
    let repr = field_bytes(value).ok_or(Error::InvalidScalar)?;
    Option::from(Scalar::from_repr(repr)).ok_or(Error::InvalidScalar)
}

pub fn from_scalar(scalar: &Scalar) -> BigUint {
    BigUint::from_bytes_be(&scalar.to_repr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use num_traits::One;

    #[test]
    fn test_generator_matches_curve_library() {
        let params = CurveParams::p384();
        assert!(params.is_on_curve(&params.generator));
        let g = from_projective(&ProjectivePoint::GENERATOR).unwrap();
        assert_eq!(g, params.generator);
        assert_eq!(&params.p % 4u32, BigUint::from(3u32));
    }

    #[test]
    fn test_hash_to_curve_is_deterministic() {
        let params = CurveParams::p384();
        let a = hash_to_curve(&params, b"alpha").unwrap();
        let b = hash_to_curve(&params, b"alpha").unwrap();
        let c = hash_to_curve(&params, b"beta").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(params.is_on_curve(&a));
        // the curve library agrees the point is valid
        to_affine(&a).unwrap();
    }

    #[test]
    fn test_hash_to_curve_x_is_counter_hash() {
        let params = CurveParams::p384();
        let point = hash_to_curve(&params, b"session").unwrap();
        let candidates: Vec<BigUint> = (0..HASH_TO_CURVE_ATTEMPTS)
            .map(|i| {
                let mut hasher = Sha256::new();
                hasher.update(b"session");
                hasher.update([i as u8]);
                BigUint::from_bytes_be(&hasher.finalize())
            })
            .collect();
        let first = candidates
            .iter()
            .position(|x| crate::crypto::mod_sqrt(&params.curve_rhs(x), &params.p).is_some())
            .unwrap();
        assert_eq!(point.x, candidates[first]);
    }

    #[test]
    fn test_point_conversions() {
        let params = CurveParams::p384();
        let off_curve = EcPoint {
            x: params.generator.x.clone(),
            y: &params.generator.y + 1u32,
        };
        assert_matches!(to_affine(&off_curve), Err(Error::InvalidPoint));

        let too_wide = EcPoint {
            x: BigUint::one() << 400usize,
            y: BigUint::one(),
        };
        assert_matches!(to_affine(&too_wide), Err(Error::InvalidPoint));

        assert_matches!(from_projective(&ProjectivePoint::IDENTITY), Err(Error::InvalidPoint));
    }

    #[test]
    fn test_field_bytes_left_pads() {
        let bytes = field_bytes(&BigUint::from(0x0102u32)).unwrap();
        assert_eq!(bytes.len(), FIELD_BYTES);
        assert!(bytes[..FIELD_BYTES - 2].iter().all(|&b| b == 0));
        assert_eq!(&bytes[FIELD_BYTES - 2..], &[0x01, 0x02]);
        assert!(field_bytes(&(BigUint::one() << 384usize)).is_none());
    }

    #[test]
    fn test_scalar_range() {
        let params = CurveParams::p384();
        let s = to_scalar(&BigUint::from(12345u32)).unwrap();
        assert_eq!(from_scalar(&s), BigUint::from(12345u32));
        assert_matches!(to_scalar(&params.n), Err(Error::InvalidScalar));
        to_scalar(&(&params.n - 1u32)).unwrap();
    }
}
