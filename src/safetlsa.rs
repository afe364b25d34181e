// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Certificate synthesis for Namecoin-form DANE.
//!
//! The root of trust is a locally generated root CA; under it sits a
//! per-process TLD CA name-constrained to the served top-level label.
//! From there, TLSA records found in DNS are turned into short-lived
//! certificates that embed the record's public key, so conventional TLS
//! clients can build a chain without understanding DANE.

use crate::dns::TlsaRecord;
use crate::error::{Error, Result};
use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DnType, ExtendedKeyUsagePurpose,
    GeneralSubtree, IsCa, Issuer, KeyPair, KeyUsagePurpose, NameConstraints, PublicKeyData,
    SanType, SerialNumber, SignatureAlgorithm,
};
use sha2::{Digest, Sha256};

pub const ROOT_COMMON_NAME: &str = "Namecoin Root CA";
pub const ORG_NAME: &str = "Namecoin";

/// Subject the bridge's own HTTPS listener answers as; synthesized
/// certificates point their AIA URL at this host.
pub const AIA_HOST: &str = "aia.x--nmc.bit";

// id-pe-authorityInfoAccess
const AIA_EXTENSION_OID: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 1];
// id-ad-caIssuers, pre-encoded as OBJECT IDENTIFIER
const CA_ISSUERS_OID_DER: &[u8] = &[0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x02];

const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_EC_P256: &str = "1.2.840.10045.3.1.7";
const OID_EC_P384: &str = "1.3.132.0.34";
const OID_ED25519: &str = "1.3.101.112";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";

/// CA validity for the root, TLD, and listener material (5 years).
const CA_VALIDITY_DAYS: i64 = 1825;
/// Synthesized domain certificates are throwaway: clients re-fetch them
/// from the bridge, so a month is plenty.
const DOMAIN_VALIDITY_DAYS: i64 = 30;
/// Exclusion CAs are minted per request and never persisted.
const EXCLUSION_VALIDITY_DAYS: i64 = 7;

/// A CA certificate plus the key material needed to sign under it.
pub struct CaCert {
    pub cert_der: Vec<u8>,
    pub cert_pem: String,
    pub key_pem: String,
}

impl CaCert {
    fn from_cert(cert: &rcgen::Certificate, key_pair: &KeyPair) -> Self {
        Self {
            cert_der: cert.der().to_vec(),
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        }
    }

    /// Create an Issuer for signing certificates.
    ///
    /// Note: this recreates the KeyPair because Issuer takes ownership.
    pub fn issuer(&self) -> Result<Issuer<'_, KeyPair>> {
        let key_pair = KeyPair::from_pem(&self.key_pem)?;
        Issuer::from_ca_cert_pem(&self.cert_pem, key_pair).map_err(Error::CertGen)
    }
}

/// A public key lifted out of a SubjectPublicKeyInfo, usable as the
/// subject key of a certificate we sign without ever holding the
/// corresponding private key.
pub struct SpkiKey {
    alg: &'static SignatureAlgorithm,
    bits: Vec<u8>,
}

impl SpkiKey {
    pub fn from_parts(algorithm: &str, parameters: Option<&str>, bits: Vec<u8>) -> Result<Self> {
        let alg = match algorithm {
            OID_EC_PUBLIC_KEY => match parameters {
                Some(OID_EC_P256) => &rcgen::PKCS_ECDSA_P256_SHA256,
                Some(OID_EC_P384) => &rcgen::PKCS_ECDSA_P384_SHA384,
                other => {
                    return Err(Error::UnsupportedKey(format!(
                        "EC curve {:?} not supported",
                        other
                    )))
                }
            },
            OID_ED25519 => &rcgen::PKCS_ED25519,
            OID_RSA_ENCRYPTION => &rcgen::PKCS_RSA_SHA256,
            other => {
                return Err(Error::UnsupportedKey(format!(
                    "key algorithm {} not supported",
                    other
                )))
            }
        };
        Ok(Self { alg, bits })
    }

    /// Parse a DER-encoded SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        use x509_parser::prelude::FromDer;

        let (_, spki) = x509_parser::x509::SubjectPublicKeyInfo::from_der(der)
            .map_err(|e| Error::UnsupportedKey(format!("bad SubjectPublicKeyInfo: {}", e)))?;

        let algorithm = spki.algorithm.algorithm.to_id_string();
        let parameters = spki
            .algorithm
            .parameters
            .as_ref()
            .and_then(|p| p.as_oid().ok())
            .map(|oid| oid.to_id_string());

        Self::from_parts(
            &algorithm,
            parameters.as_deref(),
            spki.subject_public_key.data.to_vec(),
        )
    }
}

impl PublicKeyData for SpkiKey {
    fn der_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        self.alg
    }
}

/// Random 127-bit serial number. The decimal form doubles as a cache key,
/// so it is computed here rather than re-parsed out of the signed DER.
pub fn random_serial() -> ([u8; 16], String) {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    let decimal = u128::from_be_bytes(bytes).to_string();
    (bytes, decimal)
}

fn validity(params: &mut CertificateParams, days: i64) {
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::hours(1);
    params.not_after = now + time::Duration::days(days);
}

fn ca_key_usages(params: &mut CertificateParams) {
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
}

/// Generate the self-signed root CA (`CN=Namecoin Root CA`).
pub fn generate_root_ca() -> Result<CaCert> {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, ROOT_COMMON_NAME);
    params
        .distinguished_name
        .push(DnType::OrganizationName, ORG_NAME);
    ca_key_usages(&mut params);
    let (serial, _) = random_serial();
    params.serial_number = Some(SerialNumber::from(serial.to_vec()));
    validity(&mut params, CA_VALIDITY_DAYS);

    let cert = params.self_signed(&key_pair)?;
    Ok(CaCert::from_cert(&cert, &key_pair))
}

/// Generate the per-process TLD CA (`CN=.<tld> TLD CA`), name-constrained
/// to the label it serves and signed under the root.
pub fn generate_tld_ca(tld: &str, root: &CaCert) -> Result<CaCert> {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, format!(".{} TLD CA", tld));
    params
        .distinguished_name
        .push(DnType::OrganizationName, ORG_NAME);
    ca_key_usages(&mut params);
    params.name_constraints = Some(NameConstraints {
        permitted_subtrees: vec![
            GeneralSubtree::DnsName(tld.to_string()),
            GeneralSubtree::DnsName(format!(".{}", tld)),
        ],
        excluded_subtrees: Vec::new(),
    });
    let (serial, _) = random_serial();
    params.serial_number = Some(SerialNumber::from(serial.to_vec()));
    validity(&mut params, CA_VALIDITY_DAYS);

    let issuer = root.issuer()?;
    let cert = params.signed_by(&key_pair, &issuer)?;
    Ok(CaCert::from_cert(&cert, &key_pair))
}

/// Generate a "negative" CA: one that explicitly excludes the label from
/// its naming subtree, used to carve the namespace out of constraint
/// paths. Short-lived and never persisted.
pub fn generate_exclusion_ca(tld: &str, root: &CaCert) -> Result<CaCert> {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, format!(".{} TLD Exclusion CA", tld));
    params
        .distinguished_name
        .push(DnType::OrganizationName, ORG_NAME);
    ca_key_usages(&mut params);
    params.name_constraints = Some(NameConstraints {
        permitted_subtrees: Vec::new(),
        excluded_subtrees: vec![
            GeneralSubtree::DnsName(tld.to_string()),
            GeneralSubtree::DnsName(format!(".{}", tld)),
        ],
    });
    let (serial, _) = random_serial();
    params.serial_number = Some(SerialNumber::from(serial.to_vec()));
    validity(&mut params, EXCLUSION_VALIDITY_DAYS);

    let issuer = root.issuer()?;
    let cert = params.signed_by(&key_pair, &issuer)?;
    Ok(CaCert::from_cert(&cert, &key_pair))
}

/// Synthesize a certificate for `domain` from a TLSA record, signed by
/// the TLD CA. Only full (unhashed) SubjectPublicKeyInfo associations can
/// be synthesized; anything else is rejected and the caller skips the
/// record.
pub fn cert_from_tlsa(domain: &str, tlsa: &TlsaRecord, tld_ca: &CaCert) -> Result<Vec<u8>> {
    if tlsa.selector != 1 || tlsa.matching_type != 0 {
        return Err(Error::Synthesis(format!(
            "selector {} matching {} carries no usable public key",
            tlsa.selector, tlsa.matching_type
        )));
    }

    let subject_key = SpkiKey::from_spki_der(&tlsa.cert_data)?;

    let mut params = CertificateParams::default();
    let (serial, _) = random_serial();
    params.serial_number = Some(SerialNumber::from(serial.to_vec()));
    validity(&mut params, DOMAIN_VALIDITY_DAYS);
    params
        .custom_extensions
        .push(aia_ca_issuers_extension(&tld_aia_url()));

    match tlsa.usage {
        // DANE-TA: the record names a CA key the domain owner controls.
        2 => {
            params
                .distinguished_name
                .push(DnType::CommonName, format!("{} Domain CA", domain));
            ca_key_usages(&mut params);
            params.name_constraints = Some(NameConstraints {
                permitted_subtrees: vec![
                    GeneralSubtree::DnsName(domain.to_string()),
                    GeneralSubtree::DnsName(format!(".{}", domain)),
                ],
                excluded_subtrees: Vec::new(),
            });
        }
        // DANE-EE: the record names the service key itself.
        3 => {
            params
                .distinguished_name
                .push(DnType::CommonName, domain);
            params.subject_alt_names = vec![
                SanType::DnsName(domain.to_string().try_into().map_err(|_| {
                    Error::Synthesis(format!("'{}' is not a valid DNS name", domain))
                })?),
                SanType::DnsName(format!("*.{}", domain).try_into().map_err(|_| {
                    Error::Synthesis(format!("'*.{}' is not a valid DNS name", domain))
                })?),
            ];
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
            ];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        }
        other => {
            return Err(Error::Synthesis(format!(
                "certificate usage {} is not in the Namecoin CA form",
                other
            )));
        }
    }

    let issuer = tld_ca.issuer()?;
    let cert = params.signed_by(&subject_key, &issuer)?;
    Ok(cert.der().to_vec())
}

/// AIA pre-filter: DANE-TA, full SPKI, and the association data must hash
/// to the requested value.
pub fn tlsa_matches_spki_hash(tlsa: &TlsaRecord, want_sha256: &[u8]) -> bool {
    if tlsa.usage != 2 || tlsa.selector != 1 || tlsa.matching_type != 0 {
        return false;
    }
    Sha256::digest(&tlsa.cert_data).as_slice() == want_sha256
}

fn tld_aia_url() -> String {
    format!("http://{}/aia?domain=.bit%20TLD%20CA", AIA_HOST)
}

/// DER length octets.
fn der_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xff {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, (len & 0xff) as u8]
    }
}

/// Encode an AuthorityInfoAccess extension with a single caIssuers URI.
fn aia_ca_issuers_extension(uri: &str) -> CustomExtension {
    // accessLocation: [6] IA5String
    let mut location = vec![0x86];
    location.extend(der_len(uri.len()));
    location.extend_from_slice(uri.as_bytes());

    // AccessDescription ::= SEQUENCE { accessMethod, accessLocation }
    let mut description = Vec::new();
    description.extend_from_slice(CA_ISSUERS_OID_DER);
    description.extend_from_slice(&location);

    let mut inner = vec![0x30];
    inner.extend(der_len(description.len()));
    inner.extend_from_slice(&description);

    // AuthorityInfoAccessSyntax ::= SEQUENCE OF AccessDescription
    let mut outer = vec![0x30];
    outer.extend(der_len(inner.len()));
    outer.extend_from_slice(&inner);

    CustomExtension::from_oid_content(AIA_EXTENSION_OID, outer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x509;

    /// SubjectPublicKeyInfo DER of a key pair, extracted from a throwaway
    /// self-signed certificate.
    fn spki_of(key_pair: &KeyPair) -> Vec<u8> {
        use x509_parser::prelude::*;

        let params = CertificateParams::default();
        let cert = params.self_signed(key_pair).unwrap();
        let der = cert.der().to_vec();
        let (_, parsed) = X509Certificate::from_der(&der).unwrap();
        parsed.public_key().raw.to_vec()
    }

    fn tlsa(usage: u8, selector: u8, matching_type: u8, cert_data: Vec<u8>) -> TlsaRecord {
        TlsaRecord {
            usage,
            selector,
            matching_type,
            cert_data,
        }
    }

    #[test]
    fn test_root_ca_subject() {
        let root = generate_root_ca().unwrap();
        let info = x509::parse_cert_pem(&root.cert_pem).unwrap();

        assert_eq!(info.common_name, Some("Namecoin Root CA".to_string()));
        assert_eq!(info.organization, Some("Namecoin".to_string()));
        assert!(info.is_ca);
    }

    #[test]
    fn test_tld_ca_is_constrained_and_chained() {
        let root = generate_root_ca().unwrap();
        let tld = generate_tld_ca("bit", &root).unwrap();
        let info = x509::parse_cert_pem(&tld.cert_pem).unwrap();

        assert_eq!(info.common_name, Some(".bit TLD CA".to_string()));
        assert!(info.permitted_dns.contains(&"bit".to_string()));
        assert!(info.permitted_dns.contains(&".bit".to_string()));

        let issuer = x509::issuer_common_name(&tld.cert_der).unwrap();
        assert_eq!(issuer, Some("Namecoin Root CA".to_string()));
    }

    #[test]
    fn test_exclusion_ca_excludes_tld() {
        let root = generate_root_ca().unwrap();
        let excl = generate_exclusion_ca("bit", &root).unwrap();
        let info = x509::parse_cert_pem(&excl.cert_pem).unwrap();

        assert_eq!(info.common_name, Some(".bit TLD Exclusion CA".to_string()));
        assert!(info.excluded_dns.contains(&"bit".to_string()));
        assert!(info.excluded_dns.contains(&".bit".to_string()));
        assert!(info.permitted_dns.is_empty());
    }

    #[test]
    fn test_dane_ee_synthesis() {
        let root = generate_root_ca().unwrap();
        let tld = generate_tld_ca("bit", &root).unwrap();

        let subject_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let spki = spki_of(&subject_key);
        let record = tlsa(3, 1, 0, spki.clone());

        let der = cert_from_tlsa("shop.bit", &record, &tld).unwrap();
        let info = x509::parse_cert_der(&der).unwrap();

        assert_eq!(info.common_name, Some("shop.bit".to_string()));
        assert!(info.subject_alt_names.contains(&"shop.bit".to_string()));
        assert!(info.subject_alt_names.contains(&"*.shop.bit".to_string()));
        assert!(!info.is_ca);
        assert!(info.server_auth);

        let issuer = x509::issuer_common_name(&der).unwrap();
        assert_eq!(issuer, Some(".bit TLD CA".to_string()));

        // The synthesized certificate carries the record's key, not a new one.
        let want = x509::parse_cert_der(&spki_cert(&subject_key)).unwrap();
        assert_eq!(info.spki_bits, want.spki_bits);
    }

    fn spki_cert(key_pair: &KeyPair) -> Vec<u8> {
        let params = CertificateParams::default();
        params.self_signed(key_pair).unwrap().der().to_vec()
    }

    #[test]
    fn test_dane_ta_synthesis_is_constrained_ca() {
        let root = generate_root_ca().unwrap();
        let tld = generate_tld_ca("bit", &root).unwrap();

        let subject_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let record = tlsa(2, 1, 0, spki_of(&subject_key));

        let der = cert_from_tlsa("shop.bit", &record, &tld).unwrap();
        let info = x509::parse_cert_der(&der).unwrap();

        assert_eq!(info.common_name, Some("shop.bit Domain CA".to_string()));
        assert!(info.is_ca);
        assert!(info.permitted_dns.contains(&"shop.bit".to_string()));
        assert!(info.permitted_dns.contains(&".shop.bit".to_string()));
    }

    #[test]
    fn test_synthesis_rejects_hashed_associations() {
        let root = generate_root_ca().unwrap();
        let tld = generate_tld_ca("bit", &root).unwrap();

        let subject_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let spki = spki_of(&subject_key);

        // SHA-256 matching type: no key to embed.
        assert!(cert_from_tlsa("shop.bit", &tlsa(3, 1, 1, spki.clone()), &tld).is_err());
        // Full-certificate selector: not Namecoin CA form.
        assert!(cert_from_tlsa("shop.bit", &tlsa(3, 0, 0, spki.clone()), &tld).is_err());
        // PKIX usages: not Namecoin CA form.
        assert!(cert_from_tlsa("shop.bit", &tlsa(0, 1, 0, spki), &tld).is_err());
    }

    #[test]
    fn test_synthesis_rejects_garbage_spki() {
        let root = generate_root_ca().unwrap();
        let tld = generate_tld_ca("bit", &root).unwrap();

        let record = tlsa(3, 1, 0, vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(cert_from_tlsa("shop.bit", &record, &tld).is_err());
    }

    #[test]
    fn test_spki_hash_filter() {
        let subject_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let spki = spki_of(&subject_key);
        let digest = Sha256::digest(&spki);

        assert!(tlsa_matches_spki_hash(&tlsa(2, 1, 0, spki.clone()), &digest));
        // Wrong hash.
        assert!(!tlsa_matches_spki_hash(&tlsa(2, 1, 0, spki.clone()), &[0u8; 32]));
        // Wrong shape.
        assert!(!tlsa_matches_spki_hash(&tlsa(3, 1, 0, spki.clone()), &digest));
        assert!(!tlsa_matches_spki_hash(&tlsa(2, 0, 0, spki.clone()), &digest));
        assert!(!tlsa_matches_spki_hash(&tlsa(2, 1, 1, spki), &digest));
    }

    #[test]
    fn test_random_serial_decimal_round_trip() {
        let (bytes, decimal) = random_serial();
        assert_eq!(bytes[0] & 0x80, 0);
        assert_eq!(u128::from_be_bytes(bytes).to_string(), decimal);
    }

    #[test]
    fn test_aia_extension_der_shape() {
        let uri = "http://aia.x--nmc.bit/aia?domain=.bit%20TLD%20CA";
        let ext = aia_ca_issuers_extension(uri);
        let content = ext.content();

        // Outer SEQUENCE wrapping one AccessDescription.
        assert_eq!(content[0], 0x30);
        // caIssuers access method is present, followed by a [6] URI.
        let body = &content[2..];
        assert_eq!(body[0], 0x30);
        assert!(body
            .windows(CA_ISSUERS_OID_DER.len())
            .any(|w| w == CA_ISSUERS_OID_DER));
        let uri_pos = body.windows(uri.len()).position(|w| w == uri.as_bytes());
        assert!(uri_pos.is_some());
    }

    #[test]
    fn test_der_len_forms() {
        assert_eq!(der_len(5), vec![5]);
        assert_eq!(der_len(0x7f), vec![0x7f]);
        assert_eq!(der_len(0x80), vec![0x81, 0x80]);
        assert_eq!(der_len(0x1234), vec![0x82, 0x12, 0x34]);
    }
}
