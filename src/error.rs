// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Root CA material not found. Run 'danebridge init' first.")]
    RootNotInitialized,

    #[error("Root CA material already exists at {0}. Use --force to regenerate.")]
    RootAlreadyExists(PathBuf),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Certificate generation failed: {0}")]
    CertGen(#[from] rcgen::Error),

    #[error("Failed to parse certificate: {0}")]
    CertParse(String),

    #[error("Failed to parse private key: {0}")]
    KeyParse(String),

    #[error("Unsupported public key: {0}")]
    UnsupportedKey(String),

    #[error("TLSA record not usable for synthesis: {0}")]
    Synthesis(String),

    #[error("Cross-signing failed: {0}")]
    CrossSign(String),

    #[error("DNS query failed: {0}")]
    DnsTransport(String),

    #[error("DNS response code {0} from resolver")]
    DnsRcode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind to {addr}: {reason}\nIs another process using this port?")]
    BindFailed { addr: String, reason: String },

    #[error("Invalid path (non-UTF8): {0}")]
    InvalidPath(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
