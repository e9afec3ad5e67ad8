// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Just enough X.509 handling to reach the signer key of a stored certificate: PEM
//! unwrapping and a DER walk down to `subjectPublicKeyInfo`. Certificates are not
//! validated; the token only ever verifies signatures with the enclosed key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::Error;

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;
const TAG_CTX_VERSION: u8 = 0xA0;

const PEM_BEGIN: &str = "-----BEGIN ";
const PEM_END: &str = "-----END ";

/// True if `data` looks like PEM text rather than DER.
pub fn is_pem(data: &[u8]) -> bool {
    let trimmed = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|pos| &data[pos..])
        .unwrap_or(&[]);
    trimmed.starts_with(PEM_BEGIN.as_bytes())
}

/// Decode the first PEM block in `data`, returning its label (e.g. "CERTIFICATE") and
/// DER contents. Stored PEM objects are often NUL-terminated; trailing NULs are ignored.
pub fn pem_decode(data: &[u8]) -> Result<(String, Vec<u8>), Error> {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    let text = std::str::from_utf8(&data[..end]).map_err(|_| Error::PemParse)?;

    let begin = text.find(PEM_BEGIN).ok_or(Error::PemParse)?;
    let rest = &text[begin + PEM_BEGIN.len()..];
    let label_end = rest.find("-----").ok_or(Error::PemParse)?;
    let label = rest[..label_end].to_string();
    let body_start = label_end + "-----".len();
    let footer = format!("{}{}-----", PEM_END, label);
    let body_end = rest.find(footer.as_str()).ok_or(Error::PemParse)?;
    if body_end < body_start {
        return Err(Error::PemParse);
    }

    let body: String = rest[body_start..body_end]
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let der = STANDARD.decode(body.as_bytes()).map_err(|_| Error::PemParse)?;
    Ok((label, der))
}

/// One DER TLV: its tag, contents, and the whole encoding (header included).
struct Tlv<'a> {
    tag: u8,
    value: &'a [u8],
    raw: &'a [u8],
}

/// Split the first TLV off `data`. Only definite lengths up to 4 bytes are accepted.
fn next_tlv(data: &[u8]) -> Result<(Tlv, &[u8]), Error> {
    if data.len() < 2 {
        return Err(Error::CertParse);
    }
    let tag = data[0];
    let (len, hlen) = match data[1] {
        n if n < 0x80 => (n as usize, 2),
        0x80 => return Err(Error::CertParse),
        n => {
            let count = (n & 0x7F) as usize;
            if count > 4 || data.len() < 2 + count {
                return Err(Error::CertParse);
            }
            let len = data[2..2 + count]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            (len, 2 + count)
        }
    };
    let end = hlen.checked_add(len).ok_or(Error::CertParse)?;
    if end > data.len() {
        return Err(Error::CertParse);
    }
    Ok((
        Tlv {
            tag,
            value: &data[hlen..end],
            raw: &data[..end],
        },
        &data[end..],
    ))
}

fn expect_tlv(data: &[u8], tag: u8) -> Result<(Tlv, &[u8]), Error> {
    let (tlv, rest) = next_tlv(data)?;
    if tlv.tag != tag {
        return Err(Error::CertParse);
    }
    Ok((tlv, rest))
}

/// Locate the DER `SubjectPublicKeyInfo` of an X.509 certificate.
///
/// ```text
/// Certificate ::= SEQUENCE { tbsCertificate, signatureAlgorithm, signatureValue }
/// TBSCertificate ::= SEQUENCE {
///     version [0] EXPLICIT OPTIONAL, serialNumber, signature, issuer, validity,
///     subject, subjectPublicKeyInfo, ... }
/// ```
pub fn spki_from_cert_der(cert: &[u8]) -> Result<&[u8], Error> {
    let (cert, _) = expect_tlv(cert, TAG_SEQUENCE)?;
    let (tbs, _) = expect_tlv(cert.value, TAG_SEQUENCE)?;

    let mut rest = tbs.value;
    let (first, after) = next_tlv(rest)?;
    if first.tag == TAG_CTX_VERSION {
        rest = after;
    }
    let (_serial, r) = expect_tlv(rest, TAG_INTEGER)?;
    let (_sig_alg, r) = expect_tlv(r, TAG_SEQUENCE)?;
    let (_issuer, r) = expect_tlv(r, TAG_SEQUENCE)?;
    let (_validity, r) = expect_tlv(r, TAG_SEQUENCE)?;
    let (_subject, r) = expect_tlv(r, TAG_SEQUENCE)?;
    let (spki, _) = expect_tlv(r, TAG_SEQUENCE)?;
    Ok(spki.raw)
}

/// True if `der` parses as a certificate rather than a bare key structure.
pub fn is_cert_der(der: &[u8]) -> bool {
    spki_from_cert_der(der).is_ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// DER TLV encoder for building test structures.
    pub fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        match value.len() {
            n if n < 0x80 => out.push(n as u8),
            n if n <= 0xFF => out.extend_from_slice(&[0x81, n as u8]),
            n => out.extend_from_slice(&[0x82, (n >> 8) as u8, n as u8]),
        }
        out.extend_from_slice(value);
        out
    }

    /// A structurally valid certificate wrapping `spki`. The signature is garbage.
    pub fn fake_cert(spki: &[u8]) -> Vec<u8> {
        let version = tlv(TAG_CTX_VERSION, &tlv(TAG_INTEGER, &[2]));
        let serial = tlv(TAG_INTEGER, &[0x01, 0x23]);
        let alg = tlv(TAG_SEQUENCE, &tlv(0x06, &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02]));
        let name = tlv(TAG_SEQUENCE, &tlv(0x31, &tlv(TAG_SEQUENCE, b"")));
        let validity = tlv(
            TAG_SEQUENCE,
            &[tlv(0x17, b"200101000000Z"), tlv(0x17, b"300101000000Z")].concat(),
        );
        let tbs = tlv(
            TAG_SEQUENCE,
            &[version, serial, alg.clone(), name.clone(), validity, name, spki.to_vec()].concat(),
        );
        let sig = tlv(0x03, &[0x00, 0x30, 0x00]);
        tlv(TAG_SEQUENCE, &[tbs, alg, sig].concat())
    }

    pub fn pem_encode(label: &str, der: &[u8]) -> String {
        let body = STANDARD.encode(der);
        let mut out = format!("-----BEGIN {}-----\n", label);
        for chunk in body.as_bytes().chunks(64) {
            out.push_str(std::str::from_utf8(chunk).unwrap());
            out.push('\n');
        }
        out.push_str(&format!("-----END {}-----\n", label));
        out
    }

    #[test]
    fn test_spki_extraction() {
        let spki = tlv(TAG_SEQUENCE, &[tlv(TAG_SEQUENCE, b"alg"), tlv(0x03, &[0; 66])].concat());
        let cert = fake_cert(&spki);
        assert_eq!(spki_from_cert_der(&cert).unwrap(), spki.as_slice());
        assert!(is_cert_der(&cert));
        assert!(!is_cert_der(&spki));
    }

    #[test]
    fn test_truncated_der() {
        let spki = tlv(TAG_SEQUENCE, b"key");
        let cert = fake_cert(&spki);
        assert_eq!(
            spki_from_cert_der(&cert[..cert.len() - 1]),
            Err(Error::CertParse)
        );
        assert_eq!(spki_from_cert_der(&[0x30, 0x80]), Err(Error::CertParse));
        assert_eq!(spki_from_cert_der(&[]), Err(Error::CertParse));
    }

    #[test]
    fn test_pem_round_trip() {
        let der = (0u8..200).collect::<Vec<u8>>();
        let mut pem = pem_encode("CERTIFICATE", &der).into_bytes();
        pem.push(0);
        assert!(is_pem(&pem));
        let (label, decoded) = pem_decode(&pem).unwrap();
        assert_eq!(label, "CERTIFICATE");
        assert_eq!(decoded, der);

        assert!(!is_pem(&der));
        assert_eq!(pem_decode(b"-----BEGIN X-----\nAAAA\n"), Err(Error::PemParse));
    }
}
