// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Key material store: the persistent root CA and the per-process TLD CA
//! derived from it at startup, plus first-run bootstrap of everything the
//! listeners need.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs::atomic_write_secret;
use crate::safetlsa::{self, CaCert};
use rcgen::{
    CertificateParams, DnType, DnValue, ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose,
    SanType, SerialNumber,
};
use std::fs;
use std::path::Path;

/// The served top-level label. Everything the bridge issues lives under it.
pub const TLD_LABEL: &str = "bit";

const LISTENER_VALIDITY_DAYS: i64 = 1825;

/// Root and TLD CA material. Immutable once constructed; handlers share
/// it behind an `Arc`.
pub struct CaMaterial {
    pub root: CaCert,
    pub tld: CaCert,
}

impl CaMaterial {
    /// Load the persistent root CA from disk and derive this process's
    /// TLD CA from it. Missing or malformed root material is fatal.
    pub fn load(config: &Config) -> Result<Self> {
        let root_cert_pem = read_pem_file(&config.root_cert)?;
        let root_key_pem = read_pem_file(&config.root_key)?;

        let root_block = pem::parse(&root_cert_pem)
            .map_err(|e| Error::CertParse(format!("{}: {}", config.root_cert.display(), e)))?;
        if root_block.tag() != "CERTIFICATE" {
            return Err(Error::CertParse(format!(
                "{}: expected CERTIFICATE, got {}",
                config.root_cert.display(),
                root_block.tag()
            )));
        }

        // Reject unloadable keys up front rather than on first signature.
        KeyPair::from_pem(&root_key_pem)
            .map_err(|e| Error::KeyParse(format!("{}: {}", config.root_key.display(), e)))?;

        let root = CaCert {
            cert_der: root_block.contents().to_vec(),
            cert_pem: root_cert_pem,
            key_pem: root_key_pem,
        };
        let tld = safetlsa::generate_tld_ca(TLD_LABEL, &root)?;

        Ok(Self { root, tld })
    }

    /// First-run generation: root CA, TLD CA, and the HTTPS listener's
    /// certificate chain and key. Everything is written owner-only.
    pub fn bootstrap(config: &Config, force: bool) -> Result<Self> {
        if config.root_cert.exists() && !force {
            return Err(Error::RootAlreadyExists(config.root_cert.clone()));
        }

        let root = safetlsa::generate_root_ca()?;
        let tld = safetlsa::generate_tld_ca(TLD_LABEL, &root)?;
        let (listen_chain_pem, listen_key_pem) = generate_listener(&root, &tld)?;

        for path in [
            &config.root_cert,
            &config.root_key,
            &config.listen_chain,
            &config.listen_key,
        ] {
            ensure_parent_dir(path)?;
        }

        atomic_write_secret(&config.root_cert, root.cert_pem.as_bytes())?;
        atomic_write_secret(&config.root_key, root.key_pem.as_bytes())?;
        atomic_write_secret(&config.listen_chain, listen_chain_pem.as_bytes())?;
        atomic_write_secret(&config.listen_key, listen_key_pem.as_bytes())?;

        Ok(Self { root, tld })
    }
}

fn read_pem_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::RootNotInitialized
        } else {
            Error::ReadFile {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Leaf certificate for the bridge's own HTTPS listener, issued by the
/// TLD CA so `.bit`-aware clients chain it to the root. Returns the
/// listener chain (leaf + TLD + root) and the leaf key, both PEM.
fn generate_listener(root: &CaCert, tld: &CaCert) -> Result<(String, String)> {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, safetlsa::AIA_HOST);
    // subject serialNumber (2.5.4.5) marks this as bridge-issued TLS material
    params.distinguished_name.push(
        DnType::CustomDnType(vec![2, 5, 4, 5]),
        DnValue::Utf8String("Namecoin TLS Certificate".to_string()),
    );
    params.subject_alt_names.push(SanType::DnsName(
        safetlsa::AIA_HOST
            .to_string()
            .try_into()
            .map_err(|_| Error::Config(format!("'{}' is not a valid DNS name", safetlsa::AIA_HOST)))?,
    ));
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let (serial, _) = safetlsa::random_serial();
    params.serial_number = Some(SerialNumber::from(serial.to_vec()));

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::hours(1);
    params.not_after = now + time::Duration::days(LISTENER_VALIDITY_DAYS);

    let issuer = tld.issuer()?;
    let cert = params.signed_by(&key_pair, &issuer)?;

    let chain = format!("{}\n\n{}\n\n{}", cert.pem(), tld.cert_pem, root.cert_pem);
    Ok((chain, key_pair.serialize_pem()))
}
