//! Tenant identifiers
//!
//! A [`TenantId`] can only be obtained through validation, so any value of the
//! type is safe to substitute into a database name template. The platform-wide
//! database is addressed through [`TenantRef::Core`] and never through a
//! string, which keeps tenant input from shadowing it.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::{ConnectionError, Result};

/// Identifier reserved for the platform-wide database
pub const CORE_IDENTIFIER: &str = "core";

/// Longest tenant id accepted, leaving room for the database name template
pub const MAX_TENANT_ID_LEN: usize = 48;

/// Validated organization identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TenantId(String);

impl TenantId {
    /// Validate a tenant id taken from an authenticated session.
    ///
    /// Accepts ASCII letters, digits, `-` and `_`. Everything else (path,
    /// query and quoting characters, dots, whitespace) could change what a
    /// templated database name or URL refers to, so it is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(ConnectionError::invalid_target("tenant id is empty"));
        }
        if raw.len() > MAX_TENANT_ID_LEN {
            return Err(ConnectionError::invalid_target(format!(
                "tenant id is longer than {MAX_TENANT_ID_LEN} bytes"
            )));
        }
        if raw.eq_ignore_ascii_case(CORE_IDENTIFIER) {
            return Err(ConnectionError::invalid_target(format!(
                "tenant id `{raw}` is reserved for the core database"
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(ConnectionError::invalid_target(format!(
                "tenant id contains forbidden character {bad:?}"
            )));
        }

        Ok(TenantId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for TenantId {
    type Error = ConnectionError;

    fn try_from(raw: &str) -> Result<Self> {
        TenantId::parse(raw)
    }
}

/// Registry key: either the core database or one tenant's database
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TenantRef {
    Core,
    Tenant(TenantId),
}

impl TenantRef {
    pub fn is_core(&self) -> bool {
        matches!(self, TenantRef::Core)
    }
}

impl From<TenantId> for TenantRef {
    fn from(id: TenantId) -> Self {
        TenantRef::Tenant(id)
    }
}

impl fmt::Display for TenantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantRef::Core => f.write_str(CORE_IDENTIFIER),
            TenantRef::Tenant(id) => write!(f, "tenant:{id}"),
        }
    }
}

impl Serialize for TenantRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_slug_and_uuid() {
        assert_eq!(TenantId::parse("acme").unwrap().as_str(), "acme");
        assert!(TenantId::parse("globex_corp-2").is_ok());
        assert!(TenantId::parse("6f1c2a9e-3b0d-4c57-9a43-2f7de1a0b8c4").is_ok());
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            TenantId::parse(""),
            Err(ConnectionError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_rejects_reserved_core_any_case() {
        for raw in ["core", "CORE", "Core"] {
            let err = TenantId::parse(raw).unwrap_err();
            assert!(err.to_string().contains("reserved"), "{raw}: {err}");
        }
        // Only the exact identifier is reserved
        assert!(TenantId::parse("core2").is_ok());
    }

    #[test]
    fn test_rejects_name_breaking_characters() {
        for raw in [
            "acme/admin",
            "acme?authSource=admin",
            "acme#x",
            "ac.me",
            "ac me",
            "acme$",
            "acme\0",
            "a`b",
            "a'b",
            "a\"b",
            "acme\\x",
            "ácme",
        ] {
            assert!(
                matches!(TenantId::parse(raw), Err(ConnectionError::InvalidTarget(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_overlong() {
        let raw = "a".repeat(MAX_TENANT_ID_LEN + 1);
        assert!(TenantId::parse(&raw).is_err());
        assert!(TenantId::parse(&raw[..MAX_TENANT_ID_LEN]).is_ok());
    }

    #[test]
    fn test_tenant_ref_display() {
        assert_eq!(TenantRef::Core.to_string(), "core");
        let acme: TenantRef = TenantId::parse("acme").unwrap().into();
        assert_eq!(acme.to_string(), "tenant:acme");
        assert!(!acme.is_core());
    }
}
