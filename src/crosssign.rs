// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Cross-signing: re-issue an existing certificate under a different
//! issuer while preserving its subject and public key, so trust paths
//! can be spliced together without access to the subject's private key.

use crate::error::{Error, Result};
use crate::safetlsa::{random_serial, SpkiKey};
use crate::x509::{self, encode_pem};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, GeneralSubtree, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, NameConstraints, SanType, SerialNumber,
};

const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";

/// A freshly signed certificate plus the serial it was issued under.
pub struct CrossSigned {
    pub der: Vec<u8>,
    pub pem: String,
    pub serial_decimal: String,
}

/// Cross-sign a PEM certificate under the given signer. The signer key
/// may be a SEC1 `EC PRIVATE KEY` or a PKCS#8 `PRIVATE KEY`.
pub fn cross_sign_pem(
    to_sign_pem: &str,
    signer_cert_pem: &str,
    signer_key_pem: &str,
) -> Result<CrossSigned> {
    let to_sign = pem::parse(to_sign_pem)
        .map_err(|e| Error::CrossSign(format!("bad to-sign PEM: {}", e)))?;
    if to_sign.tag() != "CERTIFICATE" {
        return Err(Error::CrossSign(format!(
            "to-sign is a {}, expected CERTIFICATE",
            to_sign.tag()
        )));
    }

    let signer_cert = pem::parse(signer_cert_pem)
        .map_err(|e| Error::CrossSign(format!("bad signer-cert PEM: {}", e)))?;
    if signer_cert.tag() != "CERTIFICATE" {
        return Err(Error::CrossSign(format!(
            "signer-cert is a {}, expected CERTIFICATE",
            signer_cert.tag()
        )));
    }

    let signer_key = key_pair_from_ec_pem(signer_key_pem)?;

    cross_sign(to_sign.contents(), signer_cert_pem, signer_key)
}

/// Cross-sign a DER certificate under `signer_key`, issued by the CA in
/// `signer_cert_pem`.
pub fn cross_sign(
    to_sign_der: &[u8],
    signer_cert_pem: &str,
    signer_key: KeyPair,
) -> Result<CrossSigned> {
    let info = x509::parse_cert_der(to_sign_der)?;
    let subject_key = SpkiKey::from_parts(
        &info.spki_algorithm,
        info.spki_parameters.as_deref(),
        info.spki_bits.clone(),
    )?;

    let mut params = CertificateParams::default();

    if let Some(cn) = &info.common_name {
        params.distinguished_name.push(DnType::CommonName, cn);
    }
    if let Some(org) = &info.organization {
        params
            .distinguished_name
            .push(DnType::OrganizationName, org);
    }

    for san in &info.subject_alt_names {
        params.subject_alt_names.push(SanType::DnsName(
            san.clone()
                .try_into()
                .map_err(|_| Error::CrossSign(format!("bad SAN '{}'", san)))?,
        ));
    }

    if info.is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }

    let mut key_usages = Vec::new();
    if info.digital_signature {
        key_usages.push(KeyUsagePurpose::DigitalSignature);
    }
    if info.key_encipherment {
        key_usages.push(KeyUsagePurpose::KeyEncipherment);
    }
    if info.key_cert_sign {
        key_usages.push(KeyUsagePurpose::KeyCertSign);
    }
    if info.crl_sign {
        key_usages.push(KeyUsagePurpose::CrlSign);
    }
    params.key_usages = key_usages;

    let mut ekus = Vec::new();
    if info.server_auth {
        ekus.push(ExtendedKeyUsagePurpose::ServerAuth);
    }
    if info.client_auth {
        ekus.push(ExtendedKeyUsagePurpose::ClientAuth);
    }
    params.extended_key_usages = ekus;

    if !info.permitted_dns.is_empty() || !info.excluded_dns.is_empty() {
        params.name_constraints = Some(NameConstraints {
            permitted_subtrees: info
                .permitted_dns
                .iter()
                .map(|dns| GeneralSubtree::DnsName(dns.clone()))
                .collect(),
            excluded_subtrees: info
                .excluded_dns
                .iter()
                .map(|dns| GeneralSubtree::DnsName(dns.clone()))
                .collect(),
        });
    }

    params.not_before = time::OffsetDateTime::from_unix_timestamp(info.not_before_timestamp)
        .map_err(|e| Error::CrossSign(format!("bad notBefore: {}", e)))?;
    params.not_after = time::OffsetDateTime::from_unix_timestamp(info.not_after_timestamp)
        .map_err(|e| Error::CrossSign(format!("bad notAfter: {}", e)))?;

    let (serial_bytes, serial_decimal) = random_serial();
    params.serial_number = Some(SerialNumber::from(serial_bytes.to_vec()));

    let issuer = Issuer::from_ca_cert_pem(signer_cert_pem, signer_key)
        .map_err(|e| Error::CrossSign(format!("bad signer certificate: {}", e)))?;
    let cert = params
        .signed_by(&subject_key, &issuer)
        .map_err(|e| Error::CrossSign(e.to_string()))?;

    Ok(CrossSigned {
        der: cert.der().to_vec(),
        pem: cert.pem(),
        serial_decimal,
    })
}

/// Load an EC private key from PEM, accepting both the SEC1
/// `EC PRIVATE KEY` and PKCS#8 `PRIVATE KEY` envelopes.
pub fn key_pair_from_ec_pem(key_pem: &str) -> Result<KeyPair> {
    let block =
        pem::parse(key_pem).map_err(|e| Error::KeyParse(format!("bad key PEM: {}", e)))?;

    match block.tag() {
        "PRIVATE KEY" => KeyPair::from_pem(key_pem)
            .map_err(|e| Error::KeyParse(format!("bad PKCS#8 key: {}", e))),
        "EC PRIVATE KEY" => {
            let pkcs8_der = wrap_sec1_in_pkcs8(block.contents())?;
            KeyPair::from_pem(&encode_pem("PRIVATE KEY", &pkcs8_der))
                .map_err(|e| Error::KeyParse(format!("bad EC key: {}", e)))
        }
        other => Err(Error::KeyParse(format!(
            "unsupported key PEM tag '{}'",
            other
        ))),
    }
}

/// Extract the SEC1 `EC PRIVATE KEY` PEM from a PKCS#8 EC key PEM.
pub fn sec1_pem_from_pkcs8_pem(pkcs8_pem: &str) -> Result<String> {
    let block =
        pem::parse(pkcs8_pem).map_err(|e| Error::KeyParse(format!("bad key PEM: {}", e)))?;
    if block.tag() != "PRIVATE KEY" {
        return Err(Error::KeyParse(format!(
            "expected PKCS#8 PRIVATE KEY, got {}",
            block.tag()
        )));
    }

    let pki = pkcs8::PrivateKeyInfo::try_from(block.contents())
        .map_err(|e| Error::KeyParse(format!("bad PKCS#8 document: {}", e)))?;

    if pki.algorithm.oid.to_string() != OID_EC_PUBLIC_KEY {
        return Err(Error::KeyParse(format!(
            "not an EC key (algorithm {})",
            pki.algorithm.oid
        )));
    }

    Ok(encode_pem("EC PRIVATE KEY", pki.private_key))
}

/// Wrap a SEC1 ECPrivateKey into a PKCS#8 document with the P-256
/// algorithm identifier.
fn wrap_sec1_in_pkcs8(sec1_der: &[u8]) -> Result<Vec<u8>> {
    use pkcs8::der::asn1::AnyRef;
    use pkcs8::der::Encode;
    use pkcs8::{AlgorithmIdentifierRef, ObjectIdentifier, PrivateKeyInfo};

    const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
    const PRIME256V1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

    let algorithm = AlgorithmIdentifierRef {
        oid: EC_PUBLIC_KEY,
        parameters: Some(AnyRef::from(&PRIME256V1)),
    };

    let pki = PrivateKeyInfo::new(algorithm, sec1_der);
    pki.to_der()
        .map_err(|e| Error::KeyParse(format!("PKCS#8 encode failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safetlsa;

    #[test]
    fn test_ec_key_pem_round_trip() {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let pkcs8_pem = key_pair.serialize_pem();

        let sec1_pem = sec1_pem_from_pkcs8_pem(&pkcs8_pem).unwrap();
        assert!(sec1_pem.contains("BEGIN EC PRIVATE KEY"));

        // Both envelopes must load back into a usable key pair.
        key_pair_from_ec_pem(&pkcs8_pem).unwrap();
        key_pair_from_ec_pem(&sec1_pem).unwrap();
    }

    #[test]
    fn test_key_pem_rejects_other_tags() {
        let root = safetlsa::generate_root_ca().unwrap();
        assert!(key_pair_from_ec_pem(&root.cert_pem).is_err());
        assert!(sec1_pem_from_pkcs8_pem(&root.cert_pem).is_err());
    }

    #[test]
    fn test_cross_sign_preserves_subject_and_key() {
        let root = safetlsa::generate_root_ca().unwrap();
        let to_sign = safetlsa::generate_exclusion_ca("bit", &root).unwrap();

        let signer = safetlsa::generate_root_ca().unwrap();
        let signer_key_sec1 = sec1_pem_from_pkcs8_pem(&signer.key_pem).unwrap();

        let result =
            cross_sign_pem(&to_sign.cert_pem, &signer.cert_pem, &signer_key_sec1).unwrap();

        let original = x509::parse_cert_der(&to_sign.cert_der).unwrap();
        let reissued = x509::parse_cert_der(&result.der).unwrap();

        assert_eq!(reissued.common_name, original.common_name);
        assert_eq!(reissued.spki_bits, original.spki_bits);
        assert_eq!(reissued.is_ca, original.is_ca);
        assert_eq!(reissued.excluded_dns, original.excluded_dns);
        assert_eq!(reissued.not_after_timestamp, original.not_after_timestamp);

        let issuer = x509::issuer_common_name(&result.der).unwrap();
        assert_eq!(issuer, Some("Namecoin Root CA".to_string()));
    }

    #[test]
    fn test_cross_sign_serial_matches_reported_decimal() {
        let root = safetlsa::generate_root_ca().unwrap();
        let to_sign = safetlsa::generate_exclusion_ca("bit", &root).unwrap();
        let signer = safetlsa::generate_root_ca().unwrap();

        let result =
            cross_sign_pem(&to_sign.cert_pem, &signer.cert_pem, &signer.key_pem).unwrap();

        let reissued = x509::parse_cert_der(&result.der).unwrap();
        assert_eq!(reissued.serial_decimal, result.serial_decimal);
    }

    #[test]
    fn test_cross_sign_uses_fresh_serial() {
        let root = safetlsa::generate_root_ca().unwrap();
        let to_sign = safetlsa::generate_exclusion_ca("bit", &root).unwrap();
        let signer = safetlsa::generate_root_ca().unwrap();

        let original = x509::parse_cert_der(&to_sign.cert_der).unwrap();
        let result =
            cross_sign_pem(&to_sign.cert_pem, &signer.cert_pem, &signer.key_pem).unwrap();

        assert_ne!(result.serial_decimal, original.serial_decimal);
    }

    #[test]
    fn test_cross_sign_rejects_garbage() {
        let root = safetlsa::generate_root_ca().unwrap();

        assert!(cross_sign_pem("not a pem", &root.cert_pem, &root.key_pem).is_err());
        assert!(cross_sign_pem(&root.cert_pem, "not a pem", &root.key_pem).is_err());
        assert!(cross_sign_pem(&root.cert_pem, &root.cert_pem, "not a pem").is_err());
        // A certificate offered where a key is expected.
        assert!(cross_sign_pem(&root.cert_pem, &root.cert_pem, &root.cert_pem).is_err());
    }
}
