// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Local HTTP bridge translating Namecoin-form DANE (TLSA) records under
//! `.bit` into X.509 certificate chains that conventional TLS clients
//! can consume.
//!
//! ```rust,no_run
//! use danebridge::{Config, Server};
//! use std::sync::Arc;
//!
//! # async fn run() -> danebridge::Result<()> {
//! let config = Config::load(None, std::path::Path::new("."))?;
//! let server = Arc::new(Server::new(&config)?);
//! server.run(&config).await?;
//! # Ok(())
//! # }
//! ```

/// Key material store: root CA and per-process TLD CA.
pub mod ca;
/// In-memory certificate caches.
pub mod cache;
/// Configuration handling.
pub mod config;
/// Cross-signing of externally supplied certificates.
pub mod crosssign;
/// Authenticated TLSA lookups.
pub mod dns;
/// Error types.
pub mod error;
/// Filesystem utilities.
pub mod fs;
/// Certificate synthesis primitives.
pub mod safetlsa;
/// HTTP bridge and issuance engine.
pub mod server;
/// X.509 parsing helpers.
pub mod x509;

pub use ca::{CaMaterial, TLD_LABEL};
pub use cache::{DomainCache, PinnedCache};
pub use config::Config;
pub use crosssign::CrossSigned;
pub use dns::{TlsaLookup, TlsaRecord, TlsaResolver};
pub use error::{Error, Result};
pub use safetlsa::CaCert;
pub use server::{load_tls_config, FormParams, Server};
