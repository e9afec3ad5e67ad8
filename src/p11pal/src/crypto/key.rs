// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};

use super::cert;
use super::Error;

const RAW_SCALAR_LEN: usize = 32;
const SEC1_UNCOMPRESSED_LEN: usize = 65;
const SEC1_COMPRESSED_LEN: usize = 33;

/// P-256 private key, parsed from whatever form it was provisioned in.
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Accepts a raw 32-byte scalar, SEC1 `ECPrivateKey` DER, PKCS#8 DER, or either of
    /// the latter two as PEM.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if cert::is_pem(data) {
            let (label, der) = cert::pem_decode(data)?;
            return match label.as_str() {
                "EC PRIVATE KEY" => Self::from_sec1_der(&der),
                "PRIVATE KEY" => Self::from_pkcs8_der(&der),
                _ => Err(Error::BadKeyFormat),
            };
        }
        if data.len() == RAW_SCALAR_LEN {
            return SigningKey::from_slice(data)
                .map(Self)
                .map_err(|_| Error::BadKeyFormat);
        }
        Self::from_pkcs8_der(data).or_else(|_| Self::from_sec1_der(data))
    }

    fn from_sec1_der(der: &[u8]) -> Result<Self, Error> {
        p256::SecretKey::from_sec1_der(der)
            .map(|sk| Self(SigningKey::from(sk)))
            .map_err(|_| Error::BadKeyFormat)
    }

    fn from_pkcs8_der(der: &[u8]) -> Result<Self, Error> {
        SigningKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|_| Error::BadKeyFormat)
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.0
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(VerifyingKey::from(&self.0))
    }
}

/// P-256 public key, taken from a bare key or from a certificate.
#[derive(Clone, Debug)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Accepts a SEC1 point, `SubjectPublicKeyInfo` DER, an X.509 certificate DER, or
    /// PEM wrapping a public key or a certificate.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if cert::is_pem(data) {
            let (label, der) = cert::pem_decode(data)?;
            return match label.as_str() {
                "PUBLIC KEY" => Self::from_spki_der(&der),
                "CERTIFICATE" => Self::from_spki_der(cert::spki_from_cert_der(&der)?),
                _ => Err(Error::BadKeyFormat),
            };
        }
        let is_sec1 = match (data.len(), data.first()) {
            (SEC1_UNCOMPRESSED_LEN, Some(0x04)) => true,
            (SEC1_COMPRESSED_LEN, Some(0x02)) | (SEC1_COMPRESSED_LEN, Some(0x03)) => true,
            _ => false,
        };
        if is_sec1 {
            return VerifyingKey::from_sec1_bytes(data)
                .map(Self)
                .map_err(|_| Error::BadKeyFormat);
        }
        if let Ok(spki) = cert::spki_from_cert_der(data) {
            return Self::from_spki_der(spki);
        }
        Self::from_spki_der(data)
    }

    fn from_spki_der(der: &[u8]) -> Result<Self, Error> {
        VerifyingKey::from_public_key_der(der)
            .map(Self)
            .map_err(|_| Error::BadKeyFormat)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }

    /// Uncompressed SEC1 encoding of the point.
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::cert::tests::{fake_cert, pem_encode};
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    use p256::pkcs8::{EncodePrivateKey, EncodePublicKey};

    /// Fixed test scalar, so failures are reproducible.
    pub const TEST_SCALAR: [u8; 32] = [
        0xc9, 0xaf, 0xa9, 0xd8, 0x45, 0xba, 0x75, 0x16, 0x6b, 0x5c, 0x21, 0x57, 0x67, 0xb1,
        0xd6, 0x93, 0x4e, 0x50, 0xc3, 0xdb, 0x36, 0xe8, 0x9b, 0x12, 0x7b, 0x8a, 0x62, 0x2b,
        0x12, 0x0f, 0x67, 0x21,
    ];

    pub fn test_secret() -> p256::SecretKey {
        p256::SecretKey::from_slice(&TEST_SCALAR).unwrap()
    }

    pub fn spki_der() -> Vec<u8> {
        test_secret()
            .public_key()
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    pub fn cert_der() -> Vec<u8> {
        fake_cert(&spki_der())
    }

    fn expected_point() -> Vec<u8> {
        test_secret()
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    #[test]
    fn test_private_key_formats() {
        let secret = test_secret();
        let sec1 = secret.to_sec1_der().unwrap().to_vec();
        let pkcs8 = secret.to_pkcs8_der().unwrap().as_bytes().to_vec();

        let mut pkcs8_pem = pem_encode("PRIVATE KEY", &pkcs8).into_bytes();
        pkcs8_pem.push(0);
        let inputs = vec![
            TEST_SCALAR.to_vec(),
            sec1.clone(),
            pkcs8,
            pem_encode("EC PRIVATE KEY", &sec1).into_bytes(),
            pkcs8_pem,
        ];
        for input in inputs.iter() {
            let key = PrivateKey::from_bytes(input).unwrap();
            assert_eq!(key.public_key().to_sec1_bytes(), expected_point());
        }
        assert!(PrivateKey::from_bytes(b"not a key").is_err());
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_public_key_formats() {
        let point = expected_point();
        let spki = spki_der();
        let cert = cert_der();
        let inputs = vec![
            point.clone(),
            spki.clone(),
            cert.clone(),
            pem_encode("PUBLIC KEY", &spki).into_bytes(),
            pem_encode("CERTIFICATE", &cert).into_bytes(),
        ];
        for input in inputs.iter() {
            let key = PublicKey::from_bytes(input).unwrap();
            assert_eq!(key.to_sec1_bytes(), point);
        }
        assert_eq!(
            PublicKey::from_bytes(&pem_encode("RSA PUBLIC KEY", &spki).into_bytes()).err(),
            Some(Error::BadKeyFormat)
        );
    }
}
