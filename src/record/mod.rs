/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

pub mod macros;
pub mod parse;

use std::{
    borrow::Cow,
    fmt::{self, Display, Write},
    net::{Ipv4Addr, Ipv6Addr},
};

/*
      "+" pass
      "-" fail
      "~" softfail
      "?" neutral
*/
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Qualifier {
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

/*
   mechanism        = ( all / include
                      / a / mx / ptr / ip4 / ip6 / exists )

   CIDR prefixes are stored as precomputed bit masks.
*/
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Mechanism {
    All,
    Include {
        macro_string: Macro,
    },
    A {
        macro_string: Macro,
        ip4_mask: u32,
        ip6_mask: u128,
    },
    Mx {
        macro_string: Macro,
        ip4_mask: u32,
        ip6_mask: u128,
    },
    Ptr {
        macro_string: Macro,
    },
    Ip4 {
        addr: Ipv4Addr,
        mask: u32,
    },
    Ip6 {
        addr: Ipv6Addr,
        mask: u128,
    },
    Exists {
        macro_string: Macro,
    },
}

/*
    directive        = [ qualifier ] mechanism
*/
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Directive {
    pub(crate) qualifier: Qualifier,
    pub(crate) mechanism: Mechanism,
}

impl Directive {
    pub fn new(qualifier: Qualifier, mechanism: Mechanism) -> Self {
        Directive {
            qualifier,
            mechanism,
        }
    }

    pub fn qualifier(&self) -> Qualifier {
        self.qualifier
    }

    pub fn mechanism(&self) -> &Mechanism {
        &self.mechanism
    }
}

/*
      s = <sender>
      l = local-part of <sender>
      o = domain of <sender>
      d = <domain>
      i = <ip>
      p = the validated domain name of <ip> (do not use)
      v = the string "in-addr" if <ip> is ipv4, or "ip6" if <ip> is ipv6
      h = HELO/EHLO domain

   The following macro letters are allowed only in "exp" text:

      c = SMTP client IP (easily readable format)
      r = domain name of host performing the check
      t = current timestamp
*/
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum Variable {
    Sender = 0,
    SenderLocalPart = 1,
    SenderDomainPart = 2,
    Domain = 3,
    Ip = 4,
    ValidatedDomain = 5,
    IpVersion = 6,
    HeloDomain = 7,
    SmtpIp = 8,
    HostDomain = 9,
    CurrentTime = 10,
}

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Variables<'x> {
    vars: [Cow<'x, [u8]>; 11],
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Macro {
    Literal(Vec<u8>),
    Variable {
        letter: Variable,
        num_parts: u32,
        reverse: bool,
        escape: bool,
        delimiters: u64,
    },
    List(Vec<Macro>),
    None,
}

/// A parsed and validated SPF record.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Spf {
    pub(crate) version: Version,
    pub(crate) directives: Vec<Directive>,
    pub(crate) redirect: Option<Macro>,
    pub(crate) exp: Option<Macro>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Version {
    V1,
}

impl Spf {
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn redirect(&self) -> Option<&Macro> {
        self.redirect.as_ref()
    }

    pub fn exp(&self) -> Option<&Macro> {
        self.exp.as_ref()
    }
}

impl Variable {
    fn as_char(&self, escape: bool) -> char {
        let ch = match self {
            Variable::Sender => 's',
            Variable::SenderLocalPart => 'l',
            Variable::SenderDomainPart => 'o',
            Variable::Domain => 'd',
            Variable::Ip => 'i',
            Variable::ValidatedDomain => 'p',
            Variable::IpVersion => 'v',
            Variable::HeloDomain => 'h',
            Variable::SmtpIp => 'c',
            Variable::HostDomain => 'r',
            Variable::CurrentTime => 't',
        };
        if escape {
            ch.to_ascii_uppercase()
        } else {
            ch
        }
    }
}

pub(crate) const DEFAULT_DELIMITERS: u64 = 1u64 << (b'.' - b'+');

impl Display for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Macro::Literal(literal) => {
                for &ch in literal {
                    match ch {
                        b'%' => f.write_str("%%")?,
                        b' ' => f.write_str("%_")?,
                        _ => f.write_char(char::from(ch))?,
                    }
                }
                Ok(())
            }
            Macro::Variable {
                letter,
                num_parts,
                reverse,
                escape,
                delimiters,
            } => {
                write!(f, "%{{{}", letter.as_char(*escape))?;
                if *num_parts > 0 {
                    write!(f, "{}", num_parts)?;
                }
                if *reverse {
                    f.write_char('r')?;
                }
                if *delimiters != DEFAULT_DELIMITERS {
                    for ch in b'+'..=b'_' {
                        if delimiters & (1u64 << (ch - b'+')) != 0 {
                            f.write_char(char::from(ch))?;
                        }
                    }
                }
                f.write_char('}')
            }
            Macro::List(list) => {
                for item in list {
                    item.fmt(f)?;
                }
                Ok(())
            }
            Macro::None => Ok(()),
        }
    }
}

fn write_dual_cidr(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    macro_string: &Macro,
    ip4_mask: u32,
    ip6_mask: u128,
) -> fmt::Result {
    f.write_str(name)?;
    if !matches!(macro_string, Macro::None) {
        write!(f, ":{}", macro_string)?;
    }
    if ip4_mask != u32::MAX {
        write!(f, "/{}", ip4_mask.count_ones())?;
    }
    if ip6_mask != u128::MAX {
        write!(f, "//{}", ip6_mask.count_ones())?;
    }
    Ok(())
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mechanism::All => f.write_str("all"),
            Mechanism::Include { macro_string } => write!(f, "include:{}", macro_string),
            Mechanism::A {
                macro_string,
                ip4_mask,
                ip6_mask,
            } => write_dual_cidr(f, "a", macro_string, *ip4_mask, *ip6_mask),
            Mechanism::Mx {
                macro_string,
                ip4_mask,
                ip6_mask,
            } => write_dual_cidr(f, "mx", macro_string, *ip4_mask, *ip6_mask),
            Mechanism::Ptr { macro_string } => {
                f.write_str("ptr")?;
                if !matches!(macro_string, Macro::None) {
                    write!(f, ":{}", macro_string)?;
                }
                Ok(())
            }
            Mechanism::Ip4 { addr, mask } => {
                write!(f, "ip4:{}", addr)?;
                if *mask != u32::MAX {
                    write!(f, "/{}", mask.count_ones())?;
                }
                Ok(())
            }
            Mechanism::Ip6 { addr, mask } => {
                write!(f, "ip6:{}", addr)?;
                if *mask != u128::MAX {
                    write!(f, "/{}", mask.count_ones())?;
                }
                Ok(())
            }
            Mechanism::Exists { macro_string } => write!(f, "exists:{}", macro_string),
        }
    }
}

impl Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.qualifier {
            Qualifier::Pass => (),
            Qualifier::Fail => f.write_char('-')?,
            Qualifier::SoftFail => f.write_char('~')?,
            Qualifier::Neutral => f.write_char('?')?,
        }
        self.mechanism.fmt(f)
    }
}
