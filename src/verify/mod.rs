/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

pub(crate) mod eval;
pub(crate) mod session;

use std::{future::Future, net::IpAddr, pin::Pin};

use crate::{
    common::parse::TxtRecordParser,
    record::{Macro, Mechanism, Qualifier, Spf, Variables},
    Error, Query, Resolver, SpfOutput, SpfResult, Step,
};

use self::{
    eval::{
        eval_a, eval_exists, eval_mx, eval_ptr, expand, ip4_in_network, ip6_in_network, Interrupt,
    },
    session::Session,
};

const ERR_DNS_LOOKUP: &str = "DNSLookupError";
const ERR_NO_RECORD: &str = "NoSPFRecord";
const ERR_MULTIPLE_RECORDS: &str = "MoreThanOneSPFRecord";
const ERR_INVALID_RECORD: &str = "SPFRecordInvalid";
const ERR_REDIRECT_NONE: &str = "RedirectResultedInNone";

/// Mutable state shared by every record reached during one evaluation.
pub(crate) struct Context {
    pub(crate) session: Session,
    pub(crate) vars: Variables<'static>,
    pub(crate) has_p_var: bool,
    pub(crate) trace: Vec<Step>,
    pub(crate) explanation: Option<String>,
    pub(crate) message: Option<String>,
}

impl Context {
    fn new(resolver: &Resolver, query: &Query) -> Self {
        let mut vars = Variables::new();
        vars.set_ip(&query.ip);
        vars.set_domain(query.domain.clone());
        vars.set_host_domain(resolver.host_domain.clone());
        match &query.sender {
            Some(sender) => vars.set_sender(sender.clone()),
            None => vars.set_sender(format!("postmaster@{}", query.domain)),
        }
        if let Some(helo) = &query.helo {
            vars.set_helo_domain(helo.clone());
        }

        Context {
            session: Session::new(),
            vars,
            has_p_var: false,
            trace: Vec::new(),
            explanation: None,
            message: None,
        }
    }
}

impl From<Qualifier> for SpfResult {
    fn from(qualifier: Qualifier) -> Self {
        match qualifier {
            Qualifier::Pass => SpfResult::Pass,
            Qualifier::Fail => SpfResult::Fail,
            Qualifier::SoftFail => SpfResult::SoftFail,
            Qualifier::Neutral => SpfResult::Neutral,
        }
    }
}

fn is_spf_record(record: &str) -> bool {
    record.eq_ignore_ascii_case("v=spf1")
        || record
            .get(..7)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("v=spf1 "))
}

impl Resolver {
    /// Fetches and parses the SPF records published at `domain`.
    pub async fn spf_records(&self, domain: &str) -> crate::Result<Vec<Spf>> {
        self.txt_lookup(domain.to_lowercase())
            .await?
            .iter()
            .filter(|record| is_spf_record(record))
            .map(|record| Spf::parse(record.as_bytes()))
            .collect()
    }

    /// Evaluates the policy published at the query's domain against the
    /// query's connecting IP address.
    pub async fn check_host(&self, query: Query) -> SpfOutput {
        let mut query = query;
        query.domain = query.domain.to_lowercase();

        let mut ctx = Context::new(self, &query);
        let domain = query.domain.clone();
        let result = self.evaluate(query, &mut ctx).await;

        SpfOutput {
            result,
            domain,
            explanation: ctx.explanation,
            message: ctx.message,
            trace: ctx.trace,
        }
    }

    pub async fn check_ip(&self, ip: IpAddr, domain: &str) -> SpfOutput {
        self.check_host(Query::new(ip, domain)).await
    }

    fn evaluate<'x>(
        &'x self,
        query: Query,
        ctx: &'x mut Context,
    ) -> Pin<Box<dyn Future<Output = SpfResult> + Send + 'x>> {
        Box::pin(async move {
            if query.domain.is_empty() {
                return SpfResult::None;
            }

            let records = match self.txt_lookup(query.domain.to_string()).await {
                Ok(records) => records,
                Err(Error::DnsRecordNotFound(_)) => {
                    ctx.message = ERR_NO_RECORD.to_string().into();
                    return SpfResult::None;
                }
                Err(_) => {
                    ctx.message = ERR_DNS_LOOKUP.to_string().into();
                    return SpfResult::TempError;
                }
            };

            let mut candidates = records.iter().filter(|record| is_spf_record(record));
            let record = match (candidates.next(), candidates.next()) {
                (Some(record), None) => match Spf::parse(record.as_bytes()) {
                    Ok(record) => record,
                    Err(_) => {
                        ctx.message = ERR_INVALID_RECORD.to_string().into();
                        return SpfResult::PermError;
                    }
                },
                (None, _) => {
                    ctx.message = ERR_NO_RECORD.to_string().into();
                    return SpfResult::None;
                }
                (Some(_), Some(_)) => {
                    ctx.message = ERR_MULTIPLE_RECORDS.to_string().into();
                    return SpfResult::PermError;
                }
            };

            // %{d} stays anchored to the domain of the outermost query
            ctx.vars.set_domain(
                query
                    .original_domain
                    .as_deref()
                    .unwrap_or(&query.domain)
                    .to_string()
                    .into_bytes(),
            );

            for directive in record.directives() {
                let matched = match directive.mechanism() {
                    Mechanism::All => Ok(true),
                    Mechanism::Ip4 { addr, mask } => Ok(match &query.ip {
                        IpAddr::V4(ip) => ip4_in_network(ip, addr, *mask),
                        IpAddr::V6(_) => false,
                    }),
                    Mechanism::Ip6 { addr, mask } => Ok(match &query.ip {
                        IpAddr::V6(ip) => ip6_in_network(ip, addr, *mask),
                        IpAddr::V4(_) => false,
                    }),
                    Mechanism::A {
                        macro_string,
                        ip4_mask,
                        ip6_mask,
                    } => eval_a(self, ctx, &query, macro_string, *ip4_mask, *ip6_mask).await,
                    Mechanism::Mx {
                        macro_string,
                        ip4_mask,
                        ip6_mask,
                    } => eval_mx(self, ctx, &query, macro_string, *ip4_mask, *ip6_mask).await,
                    Mechanism::Ptr { macro_string } => {
                        eval_ptr(self, ctx, &query, macro_string).await
                    }
                    Mechanism::Exists { macro_string } => {
                        eval_exists(self, ctx, &query, macro_string).await
                    }
                    Mechanism::Include { macro_string } => match ctx.session.count_lookup() {
                        Ok(()) => match expand(self, ctx, &query, macro_string).await {
                            Ok(target) => {
                                match self.evaluate(query.redirected(target), &mut *ctx).await {
                                    SpfResult::Pass => Ok(true),
                                    SpfResult::SoftFail | SpfResult::Neutral => Ok(false),
                                    // a failing included policy is terminal, it does
                                    // not fall through to the remaining directives
                                    SpfResult::Fail => {
                                        ctx.trace.push(Step {
                                            term: directive.to_string(),
                                            matched: Some(true),
                                        });
                                        return SpfResult::Fail;
                                    }
                                    SpfResult::TempError => Err(Interrupt::Temp),
                                    result => Err(Interrupt::Perm(
                                        format!("Include resulted in a {result}").into(),
                                    )),
                                }
                            }
                            Err(err) => Err(err),
                        },
                        Err(err) => Err(err.into()),
                    },
                };

                match matched {
                    Ok(true) => {
                        ctx.trace.push(Step {
                            term: directive.to_string(),
                            matched: Some(true),
                        });
                        // an explanation resolved by a nested policy survives
                        // unless this record resolves one of its own
                        if let Some(exp) = record.exp() {
                            if let Some(explanation) =
                                self.resolve_explanation(ctx, &query, exp).await
                            {
                                ctx.explanation = Some(explanation);
                            }
                        }
                        return directive.qualifier().into();
                    }
                    Ok(false) => {
                        ctx.trace.push(Step {
                            term: directive.to_string(),
                            matched: Some(false),
                        });
                    }
                    Err(interrupt) => {
                        ctx.trace.push(Step {
                            term: directive.to_string(),
                            matched: None,
                        });
                        return match interrupt {
                            Interrupt::Temp => SpfResult::TempError,
                            Interrupt::Perm(message) => {
                                if message.is_some() {
                                    ctx.message = message;
                                }
                                SpfResult::PermError
                            }
                        };
                    }
                }
            }

            // redirect is only followed once no mechanism matched
            if let Some(redirect) = record.redirect() {
                let term = format!("redirect={redirect}");
                if ctx.session.count_lookup().is_err() {
                    ctx.trace.push(Step {
                        term,
                        matched: None,
                    });
                    return SpfResult::PermError;
                }
                let target = match expand(self, ctx, &query, redirect).await {
                    Ok(target) => target,
                    Err(interrupt) => {
                        ctx.trace.push(Step {
                            term,
                            matched: None,
                        });
                        return match interrupt {
                            Interrupt::Temp => SpfResult::TempError,
                            Interrupt::Perm(message) => {
                                if message.is_some() {
                                    ctx.message = message;
                                }
                                SpfResult::PermError
                            }
                        };
                    }
                };

                return match self.evaluate(query.redirected(target), &mut *ctx).await {
                    SpfResult::None => {
                        ctx.trace.push(Step {
                            term,
                            matched: None,
                        });
                        ctx.message = ERR_REDIRECT_NONE.to_string().into();
                        SpfResult::PermError
                    }
                    result => result,
                };
            }

            SpfResult::Neutral
        })
    }

    // The explanation string is resolved on a best effort basis, a failure
    // here never changes the verdict. The TXT fetch is not charged against
    // any lookup budget.
    async fn resolve_explanation(
        &self,
        ctx: &mut Context,
        query: &Query,
        exp: &Macro,
    ) -> Option<String> {
        let target = expand(self, ctx, query, exp).await.ok()?;
        let records = self.txt_lookup(target).await.ok()?;
        if records.len() != 1 {
            return None;
        }
        let text = Macro::parse(records[0].as_bytes()).ok()?;
        let explanation = text.eval(&ctx.vars, &query.domain);
        explanation.is_ascii().then_some(explanation)
    }
}
