// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! HTTP bridge: dispatches certificate lookups by common-name
//! convention, drives the TLSA-triggered issuance pipeline, and exposes
//! the cross-signing and negative-CA endpoints.

use std::collections::HashMap;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::ca::{CaMaterial, TLD_LABEL};
use crate::cache::{DomainCache, PinnedCache};
use crate::config::Config;
use crate::crosssign;
use crate::dns::{TlsaLookup, TlsaResolver};
use crate::error::{Error, Result};
use crate::safetlsa;
use crate::x509::encode_pem;

/// Dispatch name returning the root CA itself.
pub const ROOT_CA_NAME: &str = "Namecoin Root CA";
/// Dispatch name returning the TLD CA itself.
pub const TLD_CA_NAME: &str = ".bit TLD CA";
/// CA-form suffix stripped by the lookup endpoint.
pub const LOOKUP_CA_SUFFIX: &str = " Domain CA";
/// CA-form suffix stripped by the AIA endpoint.
pub const AIA_CA_SUFFIX: &str = " Domain AIA Parent CA";

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const PKIX_CONTENT_TYPE: &str = "application/pkix-cert";

/// Form/query parameters of a request, last value wins.
pub type FormParams = HashMap<String, String>;

/// Bridge state shared across requests.
pub struct Server {
    ca: CaMaterial,
    resolver: TlsaResolver,
    domain_cache: DomainCache,
    negative_cache: PinnedCache,
    original_cache: PinnedCache,
}

impl Server {
    /// Load key material from disk and build the resolver from the
    /// configuration. Fails fatally when root material is missing.
    pub fn new(config: &Config) -> Result<Self> {
        let ca = CaMaterial::load(config)?;
        let resolver = TlsaResolver::from_config(config)?;
        Ok(Self::with_parts(ca, resolver))
    }

    /// Assemble a server from pre-built parts.
    pub fn with_parts(ca: CaMaterial, resolver: TlsaResolver) -> Self {
        Self {
            ca,
            resolver,
            domain_cache: DomainCache::new(),
            negative_cache: PinnedCache::new(),
            original_cache: PinnedCache::new(),
        }
    }

    /// Replace the domain cache policy; handy for tightening expiry in
    /// tests and for deployments wanting a different refresh cadence.
    pub fn domain_cache_policy(
        mut self,
        ttl: std::time::Duration,
        fresh_window: std::time::Duration,
    ) -> Self {
        self.domain_cache = DomainCache::with_policy(ttl, fresh_window);
        self
    }

    /// Run both listeners forever. There is no graceful shutdown; the
    /// process stop tears the listeners down.
    pub async fn run(self: Arc<Self>, config: &Config) -> Result<()> {
        let ip: IpAddr = config
            .listen_ip
            .parse()
            .map_err(|_| Error::Config(format!("bad listen_ip '{}'", config.listen_ip)))?;

        let http_addr = SocketAddr::new(ip, 80);
        let http_listener = TcpListener::bind(http_addr)
            .await
            .map_err(|e| Error::BindFailed {
                addr: http_addr.to_string(),
                reason: e.to_string(),
            })?;

        let https_addr = SocketAddr::new(ip, 443);
        let https_listener = TcpListener::bind(https_addr)
            .await
            .map_err(|e| Error::BindFailed {
                addr: https_addr.to_string(),
                reason: e.to_string(),
            })?;

        let tls_config = load_tls_config(&config.listen_chain, &config.listen_key)?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let http = tokio::spawn(self.clone().serve_plain(http_listener));
        let https = tokio::spawn(self.clone().serve_tls(https_listener, acceptor));

        info!("listeners started on {}", config.listen_ip);

        let _ = tokio::try_join!(http, https);
        Ok(())
    }

    async fn serve_plain(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("accept error: {}", e);
                    continue;
                }
            };

            let server = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let svc = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.route(req).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                    debug!("connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }

    async fn serve_tls(self: Arc<Self>, listener: TcpListener, acceptor: TlsAcceptor) {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("accept error: {}", e);
                    continue;
                }
            };

            let server = self.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let tls_stream = match acceptor.accept(stream).await {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("TLS handshake failed from {}: {}", peer_addr, e);
                        return;
                    }
                };

                let io = TokioIo::new(tls_stream);
                let svc = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.route(req).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                    debug!("connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }

    /// Dispatch a request by path.
    pub async fn route(
        &self,
        req: Request<Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let params = form_params(req).await?;

        let response = match path.as_str() {
            "/lookup" => self.lookup(&params).await,
            "/aia" => self.aia(&params).await,
            "/get-new-negative-ca" => self.new_negative_ca(),
            "/cross-sign-ca" => self.cross_sign(&params),
            "/original-from-serial" => self.original_from_serial(&params),
            _ => empty_status(StatusCode::NOT_FOUND),
        };

        Ok(response)
    }

    /// `GET /lookup?domain=<name>`: concatenated PEM certificates for a
    /// `.bit` domain, synthesized from its TLSA records.
    pub async fn lookup(&self, params: &FormParams) -> Response<Full<Bytes>> {
        let domain = param(params, "domain");

        if domain == ROOT_CA_NAME {
            return text_response(self.ca.root.cert_pem.clone());
        }
        if domain == TLD_CA_NAME {
            return text_response(self.ca.tld.cert_pem.clone());
        }

        let (cache_text, need_refresh) = self.domain_cache.get(&domain);
        if !need_refresh {
            return text_response(cache_text);
        }

        let domain = domain
            .strip_suffix(LOOKUP_CA_SUFFIX)
            .unwrap_or(&domain)
            .to_string();

        if domain.contains(' ') {
            // Common names with a space are CA-form; the Namecoin-formatted
            // suffixes were already stripped, so this one is not ours.
            return text_response(String::new());
        }

        let records = match self.resolver.query_tlsa(&domain).await {
            Ok(TlsaLookup::Usable(records)) => records,
            Ok(TlsaLookup::NoDane) => return text_response(String::new()),
            Err(e) => {
                warn!("TLSA lookup for {} failed: {}", domain, e);
                return empty_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let mut body = String::new();
        for record in &records {
            let der = match safetlsa::cert_from_tlsa(&domain, record, &self.ca.tld) {
                Ok(der) => der,
                Err(e) => {
                    debug!("skipping TLSA record for {}: {}", domain, e);
                    continue;
                }
            };
            let cert_pem = encode_pem("CERTIFICATE", &der);

            // Stale cache text is replayed ahead of every fresh cert so
            // clients keep a usable set while the refresh lands.
            if !cache_text.is_empty() {
                body.push_str(&cache_text);
                body.push_str("\n\n");
            }
            body.push_str(&cert_pem);

            self.domain_cache.put_deferred(domain.clone(), cert_pem);
        }

        text_response(body)
    }

    /// `GET /aia?domain=<name>&pubsha256=<hex>`: single DER certificate
    /// whose SPKI hashes to the requested value, for AIA chasing.
    pub async fn aia(&self, params: &FormParams) -> Response<Full<Bytes>> {
        let domain = param(params, "domain");

        if domain == ROOT_CA_NAME {
            return pkix_response(self.ca.root.cert_der.clone());
        }
        if domain == TLD_CA_NAME {
            return pkix_response(self.ca.tld.cert_der.clone());
        }

        let domain = domain
            .strip_suffix(AIA_CA_SUFFIX)
            .unwrap_or(&domain)
            .to_string();

        if domain.contains(' ') {
            return pkix_status(StatusCode::NOT_FOUND);
        }

        let records = match self.resolver.query_tlsa(&domain).await {
            Ok(TlsaLookup::Usable(records)) => records,
            Ok(TlsaLookup::NoDane) => return pkix_status(StatusCode::NOT_FOUND),
            Err(e) => {
                warn!("TLSA lookup for {} failed: {}", domain, e);
                return pkix_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let want_sha256 = match hex::decode(param(params, "pubsha256")) {
            Ok(bytes) => bytes,
            Err(_) => return pkix_status(StatusCode::NOT_FOUND),
        };

        for record in &records {
            if !safetlsa::tlsa_matches_spki_hash(record, &want_sha256) {
                continue;
            }
            match safetlsa::cert_from_tlsa(&domain, record, &self.ca.tld) {
                Ok(der) => return pkix_response(der),
                Err(e) => {
                    debug!("skipping TLSA record for {}: {}", domain, e);
                    continue;
                }
            }
        }

        pkix_status(StatusCode::NOT_FOUND)
    }

    /// `GET /get-new-negative-ca`: mint a fresh `.bit`-excluding CA and
    /// hand out both the certificate and its key.
    pub fn new_negative_ca(&self) -> Response<Full<Bytes>> {
        let exclusion = match safetlsa::generate_exclusion_ca(TLD_LABEL, &self.ca.root) {
            Ok(ca) => ca,
            Err(e) => {
                warn!("generating exclusion CA failed: {}", e);
                return empty_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let key_pem = match crosssign::sec1_pem_from_pkcs8_pem(&exclusion.key_pem) {
            Ok(pem) => pem,
            Err(e) => {
                warn!("encoding exclusion CA key failed: {}", e);
                return empty_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        text_response(format!("{}\n\n{}", exclusion.cert_pem, key_pem))
    }

    /// `POST /cross-sign-ca`: re-issue `to-sign` under the supplied
    /// signer, caching the result by request fingerprint and the original
    /// by the result's serial.
    pub fn cross_sign(&self, params: &FormParams) -> Response<Full<Bytes>> {
        let to_sign_pem = param(params, "to-sign");
        let signer_cert_pem = param(params, "signer-cert");
        let signer_key_pem = param(params, "signer-key");

        let fingerprint = Sha256::digest(format!(
            "{}\n\n{}\n\n{}\n\n",
            to_sign_pem, signer_cert_pem, signer_key_pem
        ));
        let cache_key = hex::encode(fingerprint);

        if let Some(cached) = self.negative_cache.get(&cache_key) {
            return text_response(cached);
        }

        let result = match crosssign::cross_sign_pem(&to_sign_pem, &signer_cert_pem, &signer_key_pem)
        {
            Ok(result) => result,
            Err(e) => {
                // Decode and signing failures are deliberately
                // indistinguishable from an empty result.
                debug!("cross-signing failed: {}", e);
                return text_response(String::new());
            }
        };

        self.negative_cache.put(&cache_key, result.pem.clone());
        self.original_cache.put(&result.serial_decimal, to_sign_pem);

        text_response(result.pem)
    }

    /// `GET /original-from-serial?serial=<decimal>`: the PEM submitted as
    /// `to-sign` whose cross-signed result carries this serial.
    pub fn original_from_serial(&self, params: &FormParams) -> Response<Full<Bytes>> {
        let serial = param(params, "serial");
        match self.original_cache.get(&serial) {
            Some(pem) => text_response(pem),
            None => text_response(String::new()),
        }
    }
}

fn param(params: &FormParams, name: &str) -> String {
    params.get(name).cloned().unwrap_or_default()
}

/// Merge query-string and urlencoded-body parameters, body winning.
async fn form_params(req: Request<Incoming>) -> std::result::Result<FormParams, hyper::Error> {
    let mut params = FormParams::new();

    if let Some(query) = req.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.insert(key.into_owned(), value.into_owned());
        }
    }

    let is_form_body = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    if is_form_body {
        let body = req.into_body().collect().await?.to_bytes();
        for (key, value) in url::form_urlencoded::parse(&body) {
            params.insert(key.into_owned(), value.into_owned());
        }
    }

    Ok(params)
}

fn text_response(body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .header(CONTENT_TYPE, TEXT_CONTENT_TYPE)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn pkix_response(der: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .header(CONTENT_TYPE, PKIX_CONTENT_TYPE)
        .body(Full::new(Bytes::from(der)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn pkix_status(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, PKIX_CONTENT_TYPE)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn empty_status(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Load the HTTPS listener's rustls config from the bootstrap chain and
/// key files.
pub fn load_tls_config(chain_path: &Path, key_path: &Path) -> Result<ServerConfig> {
    use rustls_pemfile::{certs, private_key};

    let chain_file = std::fs::File::open(chain_path).map_err(|e| Error::ReadFile {
        path: chain_path.to_path_buf(),
        source: e,
    })?;

    let mut cert_chain = Vec::new();
    for (i, result) in certs(&mut BufReader::new(chain_file)).enumerate() {
        match result {
            Ok(cert) => cert_chain.push(cert),
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to parse certificate {} in chain: {}",
                    i + 1,
                    e
                )));
            }
        }
    }

    if cert_chain.is_empty() {
        return Err(Error::Config("No certificates found in chain file".into()));
    }

    let key_file = std::fs::File::open(key_path).map_err(|e| Error::ReadFile {
        path: key_path.to_path_buf(),
        source: e,
    })?;
    let key = private_key(&mut BufReader::new(key_file))
        .map_err(|e| Error::Config(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| Error::Config("No private key found in key file".into()))?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::Config(format!("TLS error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_suffixes_match_external_contract() {
        // These strings are part of the wire contract; see the AIA URLs
        // embedded in synthesized certificates.
        assert_eq!(LOOKUP_CA_SUFFIX, " Domain CA");
        assert_eq!(AIA_CA_SUFFIX, " Domain AIA Parent CA");
        assert_eq!(ROOT_CA_NAME, "Namecoin Root CA");
        assert_eq!(TLD_CA_NAME, ".bit TLD CA");
    }

    #[test]
    fn test_param_missing_is_empty() {
        let params = FormParams::new();
        assert_eq!(param(&params, "domain"), "");
    }

    #[test]
    fn test_form_param_merge_body_wins() {
        let mut params = FormParams::new();
        for (k, v) in url::form_urlencoded::parse(b"from-query=1&overridden=query") {
            params.insert(k.into_owned(), v.into_owned());
        }
        for (k, v) in url::form_urlencoded::parse(b"from-body=2&overridden=body&encoded=a%20b") {
            params.insert(k.into_owned(), v.into_owned());
        }

        assert_eq!(param(&params, "from-query"), "1");
        assert_eq!(param(&params, "from-body"), "2");
        assert_eq!(param(&params, "overridden"), "body");
        assert_eq!(param(&params, "encoded"), "a b");
    }
}
