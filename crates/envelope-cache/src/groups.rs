//! Static mapping from write categories to the namespaces they make stale.

use std::collections::HashMap;

/// Cache namespaces used by the budgeting API.
pub mod namespace {
    pub const ACCOUNTS: &str = "accounts";
    pub const ENVELOPES: &str = "envelopes";
    pub const TRANSACTIONS: &str = "transactions";
    pub const DEBTS: &str = "debts";
    pub const REPORTS: &str = "reports";
    pub const PROFILE: &str = "profile";
}

/// Write categories.
pub mod group {
    pub const TRANSACTION_WRITTEN: &str = "transaction_written";
    pub const ENVELOPE_WRITTEN: &str = "envelope_written";
    pub const ACCOUNT_WRITTEN: &str = "account_written";
    pub const DEBT_WRITTEN: &str = "debt_written";
    pub const PROFILE_WRITTEN: &str = "profile_written";
}

/// Invalidation table: group name → namespaces cleared when a write in that
/// group succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationGroups {
    groups: HashMap<String, Vec<String>>,
}

impl Default for InvalidationGroups {
    fn default() -> Self {
        use self::group::*;
        use self::namespace::*;

        Self::empty()
            .with_group(
                TRANSACTION_WRITTEN,
                [TRANSACTIONS, ENVELOPES, ACCOUNTS, REPORTS],
            )
            .with_group(ENVELOPE_WRITTEN, [ENVELOPES, REPORTS])
            .with_group(ACCOUNT_WRITTEN, [ACCOUNTS, TRANSACTIONS, REPORTS])
            .with_group(DEBT_WRITTEN, [DEBTS, REPORTS])
            .with_group(PROFILE_WRITTEN, [PROFILE])
    }
}

impl InvalidationGroups {
    /// A table with no groups.
    pub fn empty() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }

    /// Add or replace a group.
    pub fn with_group<I, S>(mut self, name: impl Into<String>, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .insert(name.into(), namespaces.into_iter().map(Into::into).collect());
        self
    }

    /// Namespaces for `group`, if the group is known.
    pub fn resolve(&self, group: &str) -> Option<&[String]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Group names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.groups.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
