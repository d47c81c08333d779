// SPDX-License-Identifier: LGPL-3.0-only

use once_cell::sync::Lazy;
use regex::Regex;

use crate::OTRError;

/// Maximum length in bytes of each of the parts of an address.
const PART_MAX_LEN: usize = 1023;

/// `ADDRESS_PATTERN` matches `[localpart@]domainpart[/resourcepart]`. The localpart excludes the
/// characters that XMPP prohibits there. Whitespace is never allowed in localpart or domainpart.
static ADDRESS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:([^"&'/:<>@\s]+)@)?([^@/\s]+)(?:/(.+))?$"#)
        .expect("BUG: failed to compile hard-coded regex-pattern.")
});
const ADDRESS_GROUP_LOCAL: usize = 1;
const ADDRESS_GROUP_DOMAIN: usize = 2;
const ADDRESS_GROUP_RESOURCE: usize = 3;

/// `verify` checks that the provided identity is a well-formed XMPP address and returns the bare
/// address (without resource) under which conversation contexts are keyed.
///
/// Accounts and peers are both identified this way. A conversation is with a peer, not with one of
/// the peer's connected resources, so different resources share a single context.
pub(crate) fn verify(identity: &str) -> Result<String, IdentityError> {
    if identity.is_empty() {
        return Err(IdentityError::Empty);
    }
    let caps = (*ADDRESS_PATTERN)
        .captures(identity)
        .ok_or(IdentityError::Malformed)?;
    let local = caps.get(ADDRESS_GROUP_LOCAL).map(|m| m.as_str());
    let domain = caps
        .get(ADDRESS_GROUP_DOMAIN)
        .expect("BUG: hard-coded regex should contain capture group for domain")
        .as_str();
    if domain.starts_with('.') || domain.ends_with('.') {
        return Err(IdentityError::Malformed);
    }
    let oversized = local.map_or(0, str::len) > PART_MAX_LEN
        || domain.len() > PART_MAX_LEN
        || caps
            .get(ADDRESS_GROUP_RESOURCE)
            .map_or(0, |m| m.as_str().len())
            > PART_MAX_LEN;
    if oversized {
        return Err(IdentityError::TooLong);
    }
    Ok(match local {
        Some(local) => format!("{local}@{domain}"),
        None => domain.to_owned(),
    })
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum IdentityError {
    Empty,
    Malformed,
    /// One of the address parts exceeds the maximum of 1023 bytes.
    TooLong,
}

impl From<IdentityError> for OTRError {
    fn from(err: IdentityError) -> Self {
        OTRError::InvalidIdentity(match err {
            IdentityError::Empty => "identity is empty",
            IdentityError::Malformed => "identity is not a well-formed address",
            IdentityError::TooLong => "identity part exceeds maximum length",
        })
    }
}
