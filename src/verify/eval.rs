/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::{record::Macro, Error, Query, Resolver};

use super::{
    session::{LimitExceeded, MAX_PTR_LOOKUPS},
    Context,
};

/// Aborts the directive walk: a DNS failure or a policy violation that
/// turns the whole evaluation into TempError or PermError.
pub(crate) enum Interrupt {
    Temp,
    Perm(Option<String>),
}

impl From<LimitExceeded> for Interrupt {
    fn from(_: LimitExceeded) -> Self {
        Interrupt::Perm(None)
    }
}

pub(crate) fn ip4_in_network(addr: &Ipv4Addr, network: &Ipv4Addr, mask: u32) -> bool {
    u32::from(*addr) & mask == u32::from(*network) & mask
}

pub(crate) fn ip6_in_network(addr: &Ipv6Addr, network: &Ipv6Addr, mask: u128) -> bool {
    u128::from(*addr) & mask == u128::from(*network) & mask
}

/// Expands a target-name and normalizes it: overlong expansions drop
/// leading labels until the domain fits in 253 characters, and a
/// trailing root dot is removed.
pub(crate) async fn expand(
    resolver: &Resolver,
    ctx: &mut Context,
    query: &Query,
    macro_string: &Macro,
) -> Result<String, Interrupt> {
    if macro_string.needs_ptr() && !ctx.has_p_var {
        let ptrs = validated_ptrs(resolver, ctx, query.ip()).await?;
        if let Some(name) = ptrs.first() {
            let name = name.strip_suffix('.').unwrap_or(name).to_string();
            ctx.vars.set_validated_domain(name.into_bytes());
        }
        ctx.has_p_var = true;
    }

    let mut domain = macro_string.eval(&ctx.vars, query.domain());
    truncate_domain(&mut domain);
    Ok(domain)
}

pub(crate) fn truncate_domain(domain: &mut String) {
    while domain.len() > 253 {
        if let Some(dot) = domain.find('.') {
            domain.replace_range(..dot + 1, "");
        } else {
            break;
        }
    }
    if domain.ends_with('.') {
        domain.pop();
    }
}

/// Returns the PTR names of `ip` that are confirmed by a matching
/// forward lookup. Reverse resolution failures yield an empty list, but
/// each candidate validation is charged against the PTR budget.
pub(crate) async fn validated_ptrs(
    resolver: &Resolver,
    ctx: &mut Context,
    ip: IpAddr,
) -> Result<Vec<String>, Interrupt> {
    ctx.session.count_lookup()?;

    let ptrs = match resolver.ptr_lookup(ip).await {
        Ok(ptrs) => ptrs,
        Err(_) => return Ok(Vec::new()),
    };

    let mut validated = Vec::new();
    for ptr in ptrs.iter().take(MAX_PTR_LOOKUPS as usize) {
        ctx.session.count_ptr_lookup()?;
        // hostnames are matched and published in lowercase
        let ptr = ptr.to_lowercase();
        let confirmed = match ip {
            IpAddr::V4(addr) => resolver
                .ipv4_lookup(&ptr)
                .await
                .map_or(false, |ips| ips.contains(&addr)),
            IpAddr::V6(addr) => resolver
                .ipv6_lookup(&ptr)
                .await
                .map_or(false, |ips| ips.contains(&addr)),
        };
        if confirmed {
            validated.push(ptr);
        }
    }

    Ok(validated)
}

pub(crate) async fn eval_a(
    resolver: &Resolver,
    ctx: &mut Context,
    query: &Query,
    macro_string: &Macro,
    ip4_mask: u32,
    ip6_mask: u128,
) -> Result<bool, Interrupt> {
    let target = expand(resolver, ctx, query, macro_string).await?;
    ctx.session.count_lookup()?;

    match query.ip() {
        IpAddr::V4(addr) => match resolver.ipv4_lookup(&target).await {
            Ok(ips) if !ips.is_empty() => {
                Ok(ips.iter().any(|ip| ip4_in_network(ip, &addr, ip4_mask)))
            }
            Ok(_) | Err(Error::DnsRecordNotFound(_)) => {
                ctx.session.count_void_lookup()?;
                Ok(false)
            }
            Err(_) => Err(Interrupt::Temp),
        },
        IpAddr::V6(addr) => match resolver.ipv6_lookup(&target).await {
            Ok(ips) if !ips.is_empty() => {
                Ok(ips.iter().any(|ip| ip6_in_network(ip, &addr, ip6_mask)))
            }
            Ok(_) | Err(Error::DnsRecordNotFound(_)) => {
                ctx.session.count_void_lookup()?;
                Ok(false)
            }
            Err(_) => Err(Interrupt::Temp),
        },
    }
}

pub(crate) async fn eval_mx(
    resolver: &Resolver,
    ctx: &mut Context,
    query: &Query,
    macro_string: &Macro,
    ip4_mask: u32,
    ip6_mask: u128,
) -> Result<bool, Interrupt> {
    let target = expand(resolver, ctx, query, macro_string).await?;
    ctx.session.count_lookup()?;

    let mx_records = match resolver.mx_lookup(&target).await {
        Ok(mx_records) if !mx_records.is_empty() => mx_records,
        Ok(_) | Err(Error::DnsRecordNotFound(_)) => {
            ctx.session.count_void_lookup()?;
            return Ok(false);
        }
        Err(_) => return Err(Interrupt::Temp),
    };

    for mx in mx_records.iter() {
        for exchange in &mx.exchanges {
            ctx.session.count_mx_lookup()?;

            // exchanges that are IP literals are matched directly
            if let Ok(ip) = exchange.strip_suffix('.').unwrap_or(exchange).parse::<IpAddr>() {
                match (ip, query.ip()) {
                    (IpAddr::V4(ip), IpAddr::V4(addr)) => {
                        if ip4_in_network(&ip, &addr, ip4_mask) {
                            return Ok(true);
                        }
                    }
                    (IpAddr::V6(ip), IpAddr::V6(addr)) => {
                        if ip6_in_network(&ip, &addr, ip6_mask) {
                            return Ok(true);
                        }
                    }
                    _ => (),
                }
                continue;
            }

            let matched = match query.ip() {
                IpAddr::V4(addr) => match resolver.ipv4_lookup(exchange).await {
                    Ok(ips) => ips.iter().any(|ip| ip4_in_network(ip, &addr, ip4_mask)),
                    Err(Error::DnsRecordNotFound(_)) => false,
                    Err(_) => return Err(Interrupt::Temp),
                },
                IpAddr::V6(addr) => match resolver.ipv6_lookup(exchange).await {
                    Ok(ips) => ips.iter().any(|ip| ip6_in_network(ip, &addr, ip6_mask)),
                    Err(Error::DnsRecordNotFound(_)) => false,
                    Err(_) => return Err(Interrupt::Temp),
                },
            };
            if matched {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

pub(crate) async fn eval_ptr(
    resolver: &Resolver,
    ctx: &mut Context,
    query: &Query,
    macro_string: &Macro,
) -> Result<bool, Interrupt> {
    let mut target = expand(resolver, ctx, query, macro_string).await?;
    target.make_ascii_lowercase();

    let ptrs = validated_ptrs(resolver, ctx, query.ip()).await?;
    Ok(ptrs.iter().any(|name| {
        name.strip_suffix('.')
            .unwrap_or(name)
            .ends_with(target.as_str())
    }))
}

pub(crate) async fn eval_exists(
    resolver: &Resolver,
    ctx: &mut Context,
    query: &Query,
    macro_string: &Macro,
) -> Result<bool, Interrupt> {
    let target = expand(resolver, ctx, query, macro_string).await?;
    ctx.session.count_lookup()?;

    // only an A query is made, even on IPv6 connections
    match resolver.ipv4_lookup(&target).await {
        Ok(ips) => Ok(!ips.is_empty()),
        Err(Error::DnsRecordNotFound(_)) => Ok(false),
        Err(_) => Err(Interrupt::Temp),
    }
}
