/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{
    fmt::Write,
    net::IpAddr,
    time::{SystemTime, UNIX_EPOCH},
};

use super::{Macro, Variable, Variables};

impl Macro {
    /// Expands the macro string using the current session variables.
    /// `default` is substituted for an absent target-name, as in a bare
    /// `a`, `mx` or `ptr` mechanism.
    pub(crate) fn eval(&self, vars: &Variables<'_>, default: &str) -> String {
        let mut result = String::with_capacity(64);
        self.eval_into(vars, default, &mut result);
        result
    }

    fn eval_into(&self, vars: &Variables<'_>, default: &str, result: &mut String) {
        match self {
            Macro::Literal(literal) => {
                for &ch in literal {
                    result.push(char::from(ch));
                }
            }
            Macro::Variable {
                letter,
                num_parts,
                reverse,
                escape,
                delimiters,
            } => {
                let value = vars.get(*letter);
                let mut parts = value
                    .split(|&ch| {
                        matches!(ch, b'+'..=b'_') && delimiters & (1u64 << (ch - b'+')) != 0
                    })
                    .collect::<Vec<_>>();
                if *reverse {
                    parts.reverse();
                }
                let skip = if *num_parts > 0 {
                    parts.len().saturating_sub(*num_parts as usize)
                } else {
                    0
                };

                for (pos, part) in parts.iter().skip(skip).enumerate() {
                    if pos > 0 {
                        result.push('.');
                    }
                    for &ch in *part {
                        if !*escape
                            || ch.is_ascii_alphanumeric()
                            || matches!(ch, b'-' | b'.' | b'_' | b'~')
                        {
                            result.push(char::from(ch));
                        } else {
                            let _ = write!(result, "%{:02X}", ch);
                        }
                    }
                }
            }
            Macro::List(list) => {
                for item in list {
                    item.eval_into(vars, default, result);
                }
            }
            Macro::None => {
                result.push_str(default);
            }
        }
    }

    // The validated domain is only resolved when a macro string
    // actually references it.
    pub(crate) fn needs_ptr(&self) -> bool {
        match self {
            Macro::Variable { letter, .. } => *letter == Variable::ValidatedDomain,
            Macro::List(list) => list.iter().any(|item| item.needs_ptr()),
            _ => false,
        }
    }
}

impl<'x> Variables<'x> {
    pub(crate) fn new() -> Self {
        let mut vars = Variables::default();
        vars.set(Variable::SenderLocalPart, b"postmaster".as_slice());
        vars.set(Variable::ValidatedDomain, b"unknown".as_slice());
        vars.set(
            Variable::CurrentTime,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs())
                .to_string()
                .into_bytes(),
        );
        vars
    }

    pub(crate) fn set_ip(&mut self, ip: &IpAddr) {
        let (dotted, version) = match ip {
            IpAddr::V4(addr) => (addr.to_string(), "in-addr"),
            IpAddr::V6(addr) => {
                let mut dotted = String::with_capacity(63);
                for byte in addr.octets() {
                    for nibble in [byte >> 4, byte & 0x0f] {
                        if !dotted.is_empty() {
                            dotted.push('.');
                        }
                        dotted.push(char::from(b"0123456789abcdef"[nibble as usize]));
                    }
                }
                (dotted, "ip6")
            }
        };
        self.set(Variable::Ip, dotted.into_bytes());
        self.set(Variable::IpVersion, version.as_bytes());
        self.set(Variable::SmtpIp, ip.to_string().into_bytes());
    }

    pub(crate) fn set_sender(&mut self, sender: impl Into<Vec<u8>>) {
        let sender = sender.into();
        if let Some(at_pos) = sender.iter().rposition(|&ch| ch == b'@') {
            if at_pos > 0 && at_pos + 1 < sender.len() {
                self.set(Variable::SenderLocalPart, sender[..at_pos].to_vec());
                self.set(Variable::SenderDomainPart, sender[at_pos + 1..].to_vec());
            }
        }
        self.set(Variable::Sender, sender);
    }

    pub(crate) fn set_domain(&mut self, domain: impl Into<Vec<u8>>) {
        self.set(Variable::Domain, domain.into());
    }

    pub(crate) fn set_helo_domain(&mut self, helo: impl Into<Vec<u8>>) {
        self.set(Variable::HeloDomain, helo.into());
    }

    pub(crate) fn set_host_domain(&mut self, host: impl Into<Vec<u8>>) {
        self.set(Variable::HostDomain, host.into());
    }

    pub(crate) fn set_validated_domain(&mut self, domain: impl Into<Vec<u8>>) {
        self.set(Variable::ValidatedDomain, domain.into());
    }

    fn set(&mut self, letter: Variable, value: impl Into<Vec<u8>>) {
        self.vars[letter as usize] = value.into().into();
    }

    fn get(&self, letter: Variable) -> &[u8] {
        self.vars[letter as usize].as_ref()
    }
}

#[cfg(test)]
mod test {
    use crate::record::{parse::SpfParser, Variables};

    #[test]
    fn expand_macro() {
        let mut vars = Variables::new();
        vars.set_sender(b"strong-bad@email.example.com".as_slice());
        vars.set_domain(b"email.example.com".as_slice());
        vars.set_ip(&"192.0.2.3".parse().unwrap());

        for (macro_string, expansion) in [
            ("%{s}", "strong-bad@email.example.com"),
            ("%{o}", "email.example.com"),
            ("%{d}", "email.example.com"),
            ("%{d4}", "email.example.com"),
            ("%{d3}", "email.example.com"),
            ("%{d2}", "example.com"),
            ("%{d1}", "com"),
            ("%{dr}", "com.example.email"),
            ("%{d2r}", "example.email"),
            ("%{l}", "strong-bad"),
            ("%{l-}", "strong.bad"),
            ("%{lr}", "strong-bad"),
            ("%{lr-}", "bad.strong"),
            ("%{l1r-}", "strong"),
            (
                "%{ir}.%{v}._spf.%{d2}",
                "3.2.0.192.in-addr._spf.example.com",
            ),
            ("%{lr-}.lp._spf.%{d2}", "bad.strong.lp._spf.example.com"),
            (
                "%{lr-}.lp.%{ir}.%{v}._spf.%{d2}",
                "bad.strong.lp.3.2.0.192.in-addr._spf.example.com",
            ),
            (
                "%{ir}.%{v}.%{l1r-}.lp._spf.%{d2}",
                "3.2.0.192.in-addr.strong.lp._spf.example.com",
            ),
            (
                "%{d2}.trusted-domains.example.net",
                "example.com.trusted-domains.example.net",
            ),
            ("%{S}", "strong-bad%40email.example.com"),
        ] {
            let (parsed, stop_char) = macro_string
                .as_bytes()
                .iter()
                .macro_string(true, false)
                .unwrap_or_else(|err| panic!("{macro_string:?} : {err:?}"));
            assert_eq!(stop_char, b' ', "{macro_string}");
            assert_eq!(parsed.eval(&vars, ""), expansion, "{macro_string}");
        }

        // IPv6 addresses expand to dotted nibbles
        vars.set_ip(&"2001:db8::cb01".parse().unwrap());
        let (parsed, _) = "%{ir}.%{v}._spf.%{d2}"
            .as_bytes()
            .iter()
            .macro_string(true, false)
            .unwrap();
        assert_eq!(
            parsed.eval(&vars, ""),
            concat!(
                "1.0.b.c.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.",
                "0.0.0.0.8.b.d.0.1.0.0.2.ip6._spf.example.com"
            )
        );
    }
}
