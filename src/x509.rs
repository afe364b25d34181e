// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Parse X.509 certificates without shelling out to openssl.

use crate::error::{Error, Result};
use x509_parser::prelude::*;

/// Subject and extension data extracted from a certificate, enough to
/// re-issue it under a different issuer.
#[derive(Debug, Clone)]
pub struct CertInfo {
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub serial_decimal: String,
    pub not_before_timestamp: i64,
    pub not_after_timestamp: i64,
    pub is_ca: bool,
    pub subject_alt_names: Vec<String>,
    pub permitted_dns: Vec<String>,
    pub excluded_dns: Vec<String>,
    pub digital_signature: bool,
    pub key_encipherment: bool,
    pub key_cert_sign: bool,
    pub crl_sign: bool,
    pub server_auth: bool,
    pub client_auth: bool,
    /// SubjectPublicKeyInfo: algorithm OID in dotted form, curve/parameter
    /// OID when present, and the raw subjectPublicKey bits.
    pub spki_algorithm: String,
    pub spki_parameters: Option<String>,
    pub spki_bits: Vec<u8>,
}

pub fn parse_cert_pem(pem_str: &str) -> Result<CertInfo> {
    let pem = ::pem::parse(pem_str)
        .map_err(|e| Error::CertParse(format!("Failed to parse PEM: {}", e)))?;

    if pem.tag() != "CERTIFICATE" {
        return Err(Error::CertParse(format!(
            "Expected CERTIFICATE, got {}",
            pem.tag()
        )));
    }

    parse_cert_der(pem.contents())
}

pub fn parse_cert_der(der: &[u8]) -> Result<CertInfo> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::CertParse(format!("Invalid X.509: {}", e)))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(String::from);

    let organization = cert
        .subject()
        .iter_organization()
        .next()
        .and_then(|o| o.as_str().ok())
        .map(String::from);

    let serial_decimal = cert.serial.to_str_radix(10);
    let not_before_timestamp = cert.validity().not_before.timestamp();
    let not_after_timestamp = cert.validity().not_after.timestamp();

    let spki = cert.public_key();
    let spki_algorithm = spki.algorithm.algorithm.to_id_string();
    let spki_parameters = spki
        .algorithm
        .parameters
        .as_ref()
        .and_then(|p| p.as_oid().ok())
        .map(|oid| oid.to_id_string());
    let spki_bits = spki.subject_public_key.data.to_vec();

    let mut info = CertInfo {
        common_name,
        organization,
        serial_decimal,
        not_before_timestamp,
        not_after_timestamp,
        is_ca: false,
        subject_alt_names: Vec::new(),
        permitted_dns: Vec::new(),
        excluded_dns: Vec::new(),
        digital_signature: false,
        key_encipherment: false,
        key_cert_sign: false,
        crl_sign: false,
        server_auth: false,
        client_auth: false,
        spki_algorithm,
        spki_parameters,
        spki_bits,
    };

    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        info.subject_alt_names.push(dns.to_string());
                    }
                }
            }
            ParsedExtension::BasicConstraints(bc) => {
                info.is_ca = bc.ca;
            }
            ParsedExtension::KeyUsage(ku) => {
                info.digital_signature = ku.digital_signature();
                info.key_encipherment = ku.key_encipherment();
                info.key_cert_sign = ku.key_cert_sign();
                info.crl_sign = ku.crl_sign();
            }
            ParsedExtension::ExtendedKeyUsage(eku) => {
                info.server_auth = eku.server_auth;
                info.client_auth = eku.client_auth;
            }
            ParsedExtension::NameConstraints(nc) => {
                if let Some(permitted) = &nc.permitted_subtrees {
                    for subtree in permitted {
                        if let GeneralName::DNSName(dns) = &subtree.base {
                            info.permitted_dns.push(dns.to_string());
                        }
                    }
                }
                if let Some(excluded) = &nc.excluded_subtrees {
                    for subtree in excluded {
                        if let GeneralName::DNSName(dns) = &subtree.base {
                            info.excluded_dns.push(dns.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Ok(info)
}

/// PEM-encode a DER blob under the given tag, with Unix line endings.
pub fn encode_pem(tag: &str, der: &[u8]) -> String {
    let block = ::pem::Pem::new(tag, der.to_vec());
    ::pem::encode_config(
        &block,
        ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF),
    )
}

/// Issuer common name of a DER certificate.
pub fn issuer_common_name(der: &[u8]) -> Result<Option<String>> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::CertParse(format!("Invalid X.509: {}", e)))?;

    let name = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(String::from);
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safetlsa;

    #[test]
    fn test_parse_root_ca() {
        let root = safetlsa::generate_root_ca().unwrap();
        let info = parse_cert_pem(&root.cert_pem).unwrap();

        assert_eq!(info.common_name, Some("Namecoin Root CA".to_string()));
        assert!(info.is_ca);
        assert!(info.key_cert_sign);
        assert_eq!(info.spki_algorithm, "1.2.840.10045.2.1");
        assert_eq!(info.spki_parameters, Some("1.2.840.10045.3.1.7".into()));
    }

    #[test]
    fn test_parse_rejects_non_certificate_pem() {
        let key_pem = rcgen::KeyPair::generate().unwrap().serialize_pem();
        assert!(parse_cert_pem(&key_pem).is_err());
    }

    #[test]
    fn test_parse_name_constraints() {
        let root = safetlsa::generate_root_ca().unwrap();
        let tld = safetlsa::generate_tld_ca("bit", &root).unwrap();
        let info = parse_cert_pem(&tld.cert_pem).unwrap();

        assert_eq!(info.common_name, Some(".bit TLD CA".to_string()));
        assert!(info.permitted_dns.contains(&"bit".to_string()));
        assert!(info.excluded_dns.is_empty());
    }

    #[test]
    fn test_issuer_common_name() {
        let root = safetlsa::generate_root_ca().unwrap();
        let tld = safetlsa::generate_tld_ca("bit", &root).unwrap();

        let issuer = issuer_common_name(&tld.cert_der).unwrap();
        assert_eq!(issuer, Some("Namecoin Root CA".to_string()));
    }

    #[test]
    fn test_encode_pem_round_trip() {
        let root = safetlsa::generate_root_ca().unwrap();
        let encoded = encode_pem("CERTIFICATE", &root.cert_der);

        assert!(encoded.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(encoded.ends_with("-----END CERTIFICATE-----\n"));
        assert!(!encoded.contains('\r'));

        let parsed = ::pem::parse(&encoded).unwrap();
        assert_eq!(parsed.contents(), root.cert_der.as_slice());
    }

    #[test]
    fn test_serial_decimal_is_numeric() {
        let root = safetlsa::generate_root_ca().unwrap();
        let info = parse_cert_pem(&root.cert_pem).unwrap();

        assert!(!info.serial_decimal.is_empty());
        assert!(info.serial_decimal.chars().all(|c| c.is_ascii_digit()));
    }
}
