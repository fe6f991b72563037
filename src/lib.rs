/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use common::cache::DnsCache;
use serde::Serialize;
use trust_dns_resolver::{proto::op::ResponseCode, TokioAsyncResolver};

pub mod common;
pub mod record;
pub mod verify;

/// SPF policy evaluator backed by a caching DNS resolver.
pub struct Resolver {
    pub(crate) resolver: TokioAsyncResolver,
    pub(crate) cache_txt: DnsCache<String, Arc<Vec<String>>>,
    pub(crate) cache_mx: DnsCache<String, Arc<Vec<MX>>>,
    pub(crate) cache_ipv4: DnsCache<String, Arc<Vec<Ipv4Addr>>>,
    pub(crate) cache_ipv6: DnsCache<String, Arc<Vec<Ipv6Addr>>>,
    pub(crate) cache_ptr: DnsCache<IpAddr, Arc<Vec<String>>>,
    pub(crate) host_domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MX {
    pub exchanges: Vec<String>,
    pub preference: u16,
}

/// Parameters of a single check_host() evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub(crate) ip: IpAddr,
    pub(crate) domain: String,
    pub(crate) helo: Option<String>,
    pub(crate) sender: Option<String>,
    pub(crate) original_domain: Option<String>,
}

impl Query {
    /// Creates a new query for `ip` against the policy published at `domain`.
    /// IPv4-mapped IPv6 addresses are unwrapped to their IPv4 form.
    pub fn new(ip: IpAddr, domain: impl Into<String>) -> Self {
        let ip = match ip {
            IpAddr::V6(addr) => match addr.to_ipv4_mapped() {
                Some(addr) => IpAddr::V4(addr),
                None => IpAddr::V6(addr),
            },
            addr => addr,
        };
        Query {
            ip,
            domain: domain.into(),
            helo: None,
            sender: None,
            original_domain: None,
        }
    }

    pub fn with_helo(mut self, helo: impl Into<String>) -> Self {
        self.helo = Some(helo.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn helo(&self) -> Option<&str> {
        self.helo.as_deref()
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    // Derives the query evaluated for an include or redirect target. The
    // domain of the outermost record is preserved for %{d} expansion.
    pub(crate) fn redirected(&self, target: String) -> Self {
        Query {
            ip: self.ip,
            domain: target,
            helo: self.helo.clone(),
            sender: self.sender.clone(),
            original_domain: self
                .original_domain
                .clone()
                .or_else(|| self.domain.clone().into()),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
pub enum SpfResult {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    TempError,
    PermError,
    None,
}

impl SpfResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpfResult::Pass => "Pass",
            SpfResult::Fail => "Fail",
            SpfResult::SoftFail => "SoftFail",
            SpfResult::Neutral => "Neutral",
            SpfResult::TempError => "TempError",
            SpfResult::PermError => "PermError",
            SpfResult::None => "None",
        }
    }

    /// Short verdict code as used in test fixtures and logs.
    pub fn short_code(&self) -> &'static str {
        match self {
            SpfResult::Pass => "+",
            SpfResult::Fail => "-",
            SpfResult::SoftFail => "~",
            SpfResult::Neutral => "?",
            SpfResult::TempError => "TE",
            SpfResult::PermError => "PE",
            SpfResult::None => "NO",
        }
    }
}

impl Display for SpfResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for SpfResult {
    type Error = crate::Error;

    fn try_from(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("pass") || value == "+" {
            Ok(SpfResult::Pass)
        } else if value.eq_ignore_ascii_case("fail") || value == "-" {
            Ok(SpfResult::Fail)
        } else if value.eq_ignore_ascii_case("softfail") || value == "~" {
            Ok(SpfResult::SoftFail)
        } else if value.eq_ignore_ascii_case("neutral") || value == "?" {
            Ok(SpfResult::Neutral)
        } else if value.eq_ignore_ascii_case("temperror") || value == "TE" {
            Ok(SpfResult::TempError)
        } else if value.eq_ignore_ascii_case("permerror") || value == "PE" {
            Ok(SpfResult::PermError)
        } else if value.eq_ignore_ascii_case("none") || value == "NO" {
            Ok(SpfResult::None)
        } else {
            Err(Error::ParseError)
        }
    }
}

/// One entry of the evaluation trace: the term in canonical form and
/// whether it matched. `matched` is `None` when the term aborted the
/// evaluation before producing a match outcome.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct Step {
    pub(crate) term: String,
    pub(crate) matched: Option<bool>,
}

impl Step {
    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn matched(&self) -> Option<bool> {
        self.matched
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct SpfOutput {
    pub(crate) result: SpfResult,
    pub(crate) domain: String,
    pub(crate) explanation: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) trace: Vec<Step>,
}

impl SpfOutput {
    pub fn result(&self) -> SpfResult {
        self.result
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    /// Diagnostic message explaining None, TempError and PermError verdicts.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn trace(&self) -> &[Step] {
        &self.trace
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    ParseError,
    InvalidRecordType,
    DnsError(String),
    DnsRecordNotFound(ResponseCode),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ParseError => write!(f, "Parse error"),
            Error::InvalidRecordType => write!(f, "Invalid record"),
            Error::DnsError(err) => write!(f, "DNS resolution error: {}", err),
            Error::DnsRecordNotFound(code) => write!(f, "DNS record not found: {}", code),
        }
    }
}
