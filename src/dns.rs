// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Authenticated TLSA lookups.
//!
//! Queries are sent over TCP with the AD bit requested. A response is
//! only usable when the resolver validated DNSSEC signatures (AD) or is
//! itself authoritative for the zone (AA); anything else is treated as
//! "no DANE" so that forged records can never reach certificate
//! synthesis.

use crate::config::Config;
use crate::error::{Error, Result};
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// One TLSA resource record, as published in DNS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsaRecord {
    pub usage: u8,
    pub selector: u8,
    pub matching_type: u8,
    pub cert_data: Vec<u8>,
}

/// Outcome of an authenticated TLSA lookup. Transport and server
/// failures are reported through `Error` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsaLookup {
    /// Trustworthy answer; may still be empty of TLSA records.
    Usable(Vec<TlsaRecord>),
    /// The domain does not publish Namecoin-form DANE (NXDOMAIN or an
    /// unauthenticated response).
    NoDane,
}

/// Resolver handle for TLSA queries.
#[derive(Debug, Clone)]
pub struct TlsaResolver {
    servers: Vec<SocketAddr>,
}

impl TlsaResolver {
    pub fn new(servers: Vec<SocketAddr>) -> Self {
        Self { servers }
    }

    /// Build a resolver from the configuration: the configured address
    /// when set, otherwise every nameserver the system resolver
    /// configuration lists (tried in order).
    pub fn from_config(config: &Config) -> Result<Self> {
        if !config.dns_address.is_empty() {
            let ip: IpAddr = config
                .dns_address
                .parse()
                .map_err(|_| Error::Config(format!("bad dns_address '{}'", config.dns_address)))?;
            return Ok(Self::new(vec![SocketAddr::new(ip, config.dns_port)]));
        }

        let (resolver_config, _opts) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|e| Error::DnsTransport(format!("error reading DNS system conf: {}", e)))?;

        let mut servers = Vec::new();
        for ns in resolver_config.name_servers() {
            if !servers.contains(&ns.socket_addr) {
                servers.push(ns.socket_addr);
            }
        }

        if servers.is_empty() {
            return Err(Error::DnsTransport(
                "no system nameservers configured".into(),
            ));
        }

        Ok(Self::new(servers))
    }

    /// Query TLSA records for `*.<domain>` (all protocols and ports of
    /// the requested hostname).
    pub async fn query_tlsa(&self, domain: &str) -> Result<TlsaLookup> {
        let name = Name::from_ascii(format!("*.{}.", domain))
            .map_err(|e| Error::DnsTransport(format!("bad query name: {}", e)))?;

        let mut query = Message::new();
        let id: u16 = rand::random();
        query
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .set_authentic_data(true)
            .add_query(Query::query(name, RecordType::TLSA));

        let wire = query
            .to_vec()
            .map_err(|e| Error::DnsTransport(format!("encode error: {}", e)))?;

        let mut last_error = None;
        for server in &self.servers {
            match exchange_tcp(*server, &wire).await {
                Ok(buf) => {
                    let response = match Message::from_vec(&buf) {
                        Ok(m) => m,
                        Err(e) => {
                            debug!(server = %server, "undecodable DNS response: {}", e);
                            last_error = Some(Error::DnsTransport(e.to_string()));
                            continue;
                        }
                    };
                    if response.id() != id {
                        debug!(server = %server, "DNS response id mismatch");
                        last_error = Some(Error::DnsTransport("response id mismatch".into()));
                        continue;
                    }
                    return classify(&response);
                }
                Err(e) => {
                    debug!(server = %server, "DNS exchange failed: {}", e);
                    last_error = Some(Error::DnsTransport(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::DnsTransport("no nameservers".into())))
    }
}

/// Map a decoded response onto the lookup decision.
fn classify(response: &Message) -> Result<TlsaLookup> {
    match response.response_code() {
        // Wildcard subdomain doesn't exist: the domain doesn't use
        // Namecoin-form DANE.
        ResponseCode::NXDomain => return Ok(TlsaLookup::NoDane),
        ResponseCode::NoError => {}
        other => return Err(Error::DnsRcode(other.to_string())),
    }

    // Only trust records that are authenticated (resolver verified
    // DNSSEC sigs) or authoritative (server owns the zone).
    let header = response.header();
    if !header.authentic_data() && !header.authoritative() {
        return Ok(TlsaLookup::NoDane);
    }

    let records = response
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::TLSA(tlsa)) => Some(TlsaRecord {
                usage: u8::from(tlsa.cert_usage()),
                selector: u8::from(tlsa.selector()),
                matching_type: u8::from(tlsa.matching()),
                cert_data: tlsa.cert_data().to_vec(),
            }),
            _ => None,
        })
        .collect();

    Ok(TlsaLookup::Usable(records))
}

/// One DNS exchange over TCP (two-byte length framing).
async fn exchange_tcp(server: SocketAddr, wire: &[u8]) -> std::io::Result<Vec<u8>> {
    tokio::time::timeout(QUERY_TIMEOUT, async {
        let mut stream = TcpStream::connect(server).await?;
        stream
            .write_all(&(wire.len() as u16).to_be_bytes())
            .await?;
        stream.write_all(wire).await?;
        stream.flush().await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;
        Ok(buf)
    })
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "DNS query timed out"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::tlsa::{CertUsage, Matching, Selector, TLSA};
    use hickory_proto::rr::Record;
    use tokio::net::TcpListener;

    /// Serve a single TCP DNS exchange, answering with `build`.
    async fn stub_dns<F>(build: F) -> SocketAddr
    where
        F: Fn(&Message) -> Message + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut len_buf = [0u8; 2];
                if stream.read_exact(&mut len_buf).await.is_err() {
                    continue;
                }
                let len = u16::from_be_bytes(len_buf) as usize;
                let mut buf = vec![0u8; len];
                if stream.read_exact(&mut buf).await.is_err() {
                    continue;
                }
                let query = Message::from_vec(&buf).unwrap();
                let response = build(&query);
                let wire = response.to_vec().unwrap();
                let _ = stream.write_all(&(wire.len() as u16).to_be_bytes()).await;
                let _ = stream.write_all(&wire).await;
            }
        });

        addr
    }

    fn response_skeleton(query: &Message) -> Message {
        let mut response = Message::new();
        response
            .set_id(query.id())
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .set_recursion_available(true)
            .set_response_code(ResponseCode::NoError);
        if let Some(q) = query.queries().first() {
            response.add_query(q.clone());
        }
        response
    }

    fn tlsa_answer(query: &Message, usage: u8, selector: u8, matching: u8, data: &[u8]) -> Record {
        let name = query.queries()[0].name().clone();
        let rdata = TLSA::new(
            CertUsage::from(usage),
            Selector::from(selector),
            Matching::from(matching),
            data.to_vec(),
        );
        Record::from_rdata(name, 600, RData::TLSA(rdata))
    }

    #[tokio::test]
    async fn test_authenticated_answer_is_usable() {
        let addr = stub_dns(|query| {
            let mut response = response_skeleton(query);
            response.set_authentic_data(true);
            let answer = tlsa_answer(query, 3, 1, 0, b"spki-bytes");
            response.add_answer(answer);
            response
        })
        .await;

        let resolver = TlsaResolver::new(vec![addr]);
        let lookup = resolver.query_tlsa("shop.bit").await.unwrap();

        match lookup {
            TlsaLookup::Usable(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].usage, 3);
                assert_eq!(records[0].selector, 1);
                assert_eq!(records[0].matching_type, 0);
                assert_eq!(records[0].cert_data, b"spki-bytes");
            }
            other => panic!("expected usable answer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_authoritative_answer_is_usable() {
        let addr = stub_dns(|query| {
            let mut response = response_skeleton(query);
            response.set_authoritative(true);
            let answer = tlsa_answer(query, 2, 1, 0, b"ca-spki");
            response.add_answer(answer);
            response
        })
        .await;

        let resolver = TlsaResolver::new(vec![addr]);
        let lookup = resolver.query_tlsa("shop.bit").await.unwrap();
        assert!(matches!(lookup, TlsaLookup::Usable(records) if records.len() == 1));
    }

    #[tokio::test]
    async fn test_unauthenticated_answer_is_no_dane() {
        let addr = stub_dns(|query| {
            // AD and AA both unset: the trust gate must reject this.
            let mut response = response_skeleton(query);
            let answer = tlsa_answer(query, 3, 1, 0, b"spki-bytes");
            response.add_answer(answer);
            response
        })
        .await;

        let resolver = TlsaResolver::new(vec![addr]);
        let lookup = resolver.query_tlsa("shop.bit").await.unwrap();
        assert_eq!(lookup, TlsaLookup::NoDane);
    }

    #[tokio::test]
    async fn test_nxdomain_is_no_dane() {
        let addr = stub_dns(|query| {
            let mut response = response_skeleton(query);
            response.set_response_code(ResponseCode::NXDomain);
            response
        })
        .await;

        let resolver = TlsaResolver::new(vec![addr]);
        let lookup = resolver.query_tlsa("nowhere.bit").await.unwrap();
        assert_eq!(lookup, TlsaLookup::NoDane);
    }

    #[tokio::test]
    async fn test_servfail_is_error() {
        let addr = stub_dns(|query| {
            let mut response = response_skeleton(query);
            response.set_response_code(ResponseCode::ServFail);
            response
        })
        .await;

        let resolver = TlsaResolver::new(vec![addr]);
        assert!(resolver.query_tlsa("shop.bit").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_error() {
        // Bind and immediately drop to find a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resolver = TlsaResolver::new(vec![addr]);
        assert!(resolver.query_tlsa("shop.bit").await.is_err());
    }

    #[tokio::test]
    async fn test_fallback_to_second_server() {
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);
            addr
        };
        let live = stub_dns(|query| {
            let mut response = response_skeleton(query);
            response.set_authentic_data(true);
            response
        })
        .await;

        let resolver = TlsaResolver::new(vec![dead, live]);
        let lookup = resolver.query_tlsa("shop.bit").await.unwrap();
        assert_eq!(lookup, TlsaLookup::Usable(Vec::new()));
    }

    #[tokio::test]
    async fn test_non_tlsa_answers_are_ignored() {
        let addr = stub_dns(|query| {
            let mut response = response_skeleton(query);
            response.set_authentic_data(true);
            let name = query.queries()[0].name().clone();
            let a = Record::from_rdata(
                name,
                600,
                RData::A(hickory_proto::rr::rdata::A::new(127, 0, 0, 1)),
            );
            response.add_answer(a);
            response
        })
        .await;

        let resolver = TlsaResolver::new(vec![addr]);
        let lookup = resolver.query_tlsa("shop.bit").await.unwrap();
        assert_eq!(lookup, TlsaLookup::Usable(Vec::new()));
    }
}
