//! ECDSA P-256 key used to sign assertions handed to clients.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePublicKey;
use p256::SecretKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::secrets::{base64_bytes, ClusterSingleton, SecretError, SecretResult};
use crate::storage::ASYMMETRIC_SIGNING_KEY_KEY;

/// The only curve this node generates or accepts.
pub const P256_CURVE: &str = "P-256";

/// Cluster-wide asymmetric signing key.
#[derive(Clone)]
pub struct AsymmetricSigningKey {
    secret: SecretKey,
}

#[derive(Serialize, Deserialize)]
pub struct SigningKeyRecord {
    ecdsa_key: EcdsaKeyRecord,
}

#[derive(Serialize, Deserialize)]
struct EcdsaKeyRecord {
    curve: String,
    #[serde(with = "base64_bytes")]
    x: Vec<u8>,
    #[serde(with = "base64_bytes")]
    y: Vec<u8>,
    #[serde(with = "base64_bytes")]
    d: Vec<u8>,
}

impl AsymmetricSigningKey {
    fn corrupt(reason: impl Into<String>) -> SecretError {
        SecretError::Corrupt {
            name: Self::RECORD_NAME,
            reason: reason.into(),
        }
    }

    /// Uncompressed affine coordinates of the public point.
    fn coordinates(&self) -> (Vec<u8>, Vec<u8>) {
        let point = self.secret.public_key().to_encoded_point(false);
        let x = point.x().map(|x| x.to_vec()).unwrap_or_default();
        let y = point.y().map(|y| y.to_vec()).unwrap_or_default();
        (x, y)
    }

    /// SubjectPublicKeyInfo DER encoding of the public key.
    pub fn public_key_der(&self) -> SecretResult<Vec<u8>> {
        self.secret
            .public_key()
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| SecretError::Encode {
                name: Self::RECORD_NAME,
                source: serde::ser::Error::custom(e),
            })
    }

    /// Base64 of [`Self::public_key_der`], as published in the client config.
    pub fn public_key_base64(&self) -> SecretResult<String> {
        Ok(STANDARD.encode(self.public_key_der()?))
    }

    /// Sign `message`, returning a DER-encoded ECDSA signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key.sign(message);
        signature.to_der().as_bytes().to_vec()
    }
}

impl fmt::Debug for AsymmetricSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsymmetricSigningKey")
            .field("curve", &P256_CURVE)
            .finish_non_exhaustive()
    }
}

impl PartialEq for AsymmetricSigningKey {
    fn eq(&self, other: &Self) -> bool {
        self.secret.to_bytes() == other.secret.to_bytes()
    }
}

impl Eq for AsymmetricSigningKey {}

impl ClusterSingleton for AsymmetricSigningKey {
    const KIND: &'static str = "signing_key";
    const RECORD_NAME: &'static str = ASYMMETRIC_SIGNING_KEY_KEY;
    type Record = SigningKeyRecord;

    fn generate() -> SecretResult<Self> {
        Ok(Self {
            secret: SecretKey::random(&mut OsRng),
        })
    }

    fn to_record(&self) -> Self::Record {
        let (x, y) = self.coordinates();
        SigningKeyRecord {
            ecdsa_key: EcdsaKeyRecord {
                curve: P256_CURVE.to_string(),
                x,
                y,
                d: self.secret.to_bytes().to_vec(),
            },
        }
    }

    fn from_record(record: Self::Record) -> SecretResult<Self> {
        let key = record.ecdsa_key;
        if key.curve != P256_CURVE {
            return Err(SecretError::UnknownCurve(key.curve));
        }

        let secret = SecretKey::from_slice(&key.d)
            .map_err(|_| Self::corrupt("private scalar is not valid for P-256"))?;
        let decoded = Self { secret };

        let (x, y) = decoded.coordinates();
        if x != key.x || y != key.y {
            return Err(Self::corrupt("public point does not match private scalar"));
        }
        Ok(decoded)
    }
}
