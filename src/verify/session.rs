/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

pub(crate) const MAX_DNS_LOOKUPS: u32 = 10;
pub(crate) const MAX_MX_LOOKUPS: u32 = 10;
pub(crate) const MAX_PTR_LOOKUPS: u32 = 10;
pub(crate) const MAX_VOID_LOOKUPS: u32 = 2;

/// A DNS processing limit was reached while evaluating a policy tree.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct LimitExceeded;

/// DNS budgets shared by an entire evaluation, including the records
/// reached through include and redirect.
#[derive(Debug, Default)]
pub(crate) struct Session {
    dns_lookups: u32,
    mx_lookups: u32,
    ptr_lookups: u32,
    void_lookups: u32,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    /// Charges one DNS-querying term. The first `MAX_DNS_LOOKUPS` are
    /// allowed, the next one fails.
    pub fn count_lookup(&mut self) -> Result<(), LimitExceeded> {
        if self.dns_lookups < MAX_DNS_LOOKUPS {
            self.dns_lookups += 1;
            Ok(())
        } else {
            Err(LimitExceeded)
        }
    }

    pub fn count_mx_lookup(&mut self) -> Result<(), LimitExceeded> {
        if self.mx_lookups < MAX_MX_LOOKUPS {
            self.mx_lookups += 1;
            Ok(())
        } else {
            Err(LimitExceeded)
        }
    }

    pub fn count_ptr_lookup(&mut self) -> Result<(), LimitExceeded> {
        if self.ptr_lookups < MAX_PTR_LOOKUPS {
            self.ptr_lookups += 1;
            Ok(())
        } else {
            Err(LimitExceeded)
        }
    }

    pub fn count_void_lookup(&mut self) -> Result<(), LimitExceeded> {
        if self.void_lookups < MAX_VOID_LOOKUPS {
            self.void_lookups += 1;
            Ok(())
        } else {
            Err(LimitExceeded)
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Session, MAX_DNS_LOOKUPS, MAX_VOID_LOOKUPS};

    #[test]
    fn lookup_budgets() {
        let mut session = Session::new();
        for _ in 0..MAX_DNS_LOOKUPS {
            assert!(session.count_lookup().is_ok());
        }
        assert!(session.count_lookup().is_err());
        assert!(session.count_lookup().is_err());

        // other budgets are tracked independently
        for _ in 0..MAX_VOID_LOOKUPS {
            assert!(session.count_void_lookup().is_ok());
        }
        assert!(session.count_void_lookup().is_err());
        assert!(session.count_mx_lookup().is_ok());
        assert!(session.count_ptr_lookup().is_ok());
    }
}
