// SPDX-License-Identifier: LGPL-3.0-only

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{utils, Version};

/// Human-readable explanation that accompanies a query message, for the benefit of peers whose
/// client does not understand OTR.
const OTR_USE_INFORMATION_MESSAGE: &str = "This user has requested an Off-the-Record private conversation. However, you do not have a plugin to support that. See http://otr.cypherpunks.ca/ for more information.";

const OTR_QUERY_PREFIX: &str = "?OTR";

/// Query tags come in three forms: `?OTR?` (version 1), `?OTRv<digits>?` (version 2 and up) and
/// the combination `?OTR?v<digits>?`. A bare `?OTR` prefix without either form, e.g. as part of an
/// encoded message `?OTR:...`, is not a query.
static QUERY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\?OTR(\?)?(?:v([0-9]*)\?)?").expect("BUG: failed to compile hard-coded regex-pattern.")
});
const QUERY_GROUP_V1: usize = 1;
const QUERY_GROUP_VERSIONS: usize = 2;

const WHITESPACE_PREFIX: &str = " \t  \t\t\t\t \t \t \t  ";
static WHITESPACE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("{WHITESPACE_PREFIX}((?:[ \\t]{{8}})*)"))
        .expect("BUG: failed to compile hard-coded regex-pattern.")
});
const WHITESPACE_GROUP_TAGS: usize = 1;
const WHITESPACE_TAG_OTRV1: &str = " \t \t  \t ";
const WHITESPACE_TAG_OTRV2: &str = "  \t\t  \t ";
const WHITESPACE_TAG_OTRV3: &str = "  \t\t  \t\t";
const WHITESPACE_TAG_OTRV4: &str = "  \t\t \t  ";

/// `query` composes a query message advertising the provided versions, followed by the
/// explanation for users without OTR support. Returns `None` if none of the versions can be
/// advertised.
#[must_use]
pub fn query(versions: &[Version]) -> Option<String> {
    let versions = utils::alloc::vec_unique(versions.to_vec());
    let mut buffer = String::from(OTR_QUERY_PREFIX);
    let mut advertised = false;
    // NOTE: version 1 is expressed by the '?' directly following the prefix, every later version
    // by its digit in the 'v'-list. Each version is listed at most once.
    if versions.contains(&Version::V1) {
        buffer.push('?');
        advertised = true;
    }
    if versions.contains(&Version::V2) {
        buffer.push_str("v2?");
        advertised = true;
    }
    for v in &versions {
        if let Version::Unsupported(n) = v {
            log::warn!("Version {n} cannot be advertised in a query message.");
        }
    }
    if !advertised {
        return None;
    }
    buffer.push(' ');
    buffer.push_str(OTR_USE_INFORMATION_MESSAGE);
    Some(buffer)
}

/// `advertised_versions` detects the protocol versions a sender advertises, either through a query
/// tag or through a whitespace tag embedded in an otherwise plain message. The versions are
/// returned in ascending order, unsupported versions included. A message without either tag
/// advertises nothing.
#[must_use]
pub fn advertised_versions(text: &str) -> Vec<Version> {
    if let Some(versions) = parse_query(text) {
        return versions;
    }
    if let Some(caps) = (*WHITESPACE_PATTERN).captures(text) {
        let tags = caps
            .get(WHITESPACE_GROUP_TAGS)
            .expect("BUG: hard-coded regex should include capture group");
        return utils::alloc::vec_unique(parse_whitespace_tags(tags.as_str()));
    }
    Vec::new()
}

fn parse_query(text: &str) -> Option<Vec<Version>> {
    for caps in (*QUERY_PATTERN).captures_iter(text) {
        let v1 = caps.get(QUERY_GROUP_V1).is_some();
        let digits = caps.get(QUERY_GROUP_VERSIONS);
        if !v1 && digits.is_none() {
            continue;
        }
        let mut versions = Vec::new();
        if v1 {
            versions.push(Version::V1);
        }
        if let Some(digits) = digits {
            versions.extend(digits.as_str().bytes().map(|v| match v {
                // '1' is not allowed in the 'v'-list, as version 1 has its own syntax.
                b'1' => Version::Unsupported(1u16),
                b'2' => Version::V2,
                d => Version::Unsupported(u16::from(d - b'0')),
            }));
        }
        return Some(utils::alloc::vec_unique(versions));
    }
    None
}

fn parse_whitespace_tags(data: &str) -> Vec<Version> {
    let mut result = Vec::new();
    for i in (0..data.len()).step_by(8) {
        match &data[i..i + 8] {
            WHITESPACE_TAG_OTRV1 => result.push(Version::V1),
            WHITESPACE_TAG_OTRV2 => result.push(Version::V2),
            WHITESPACE_TAG_OTRV3 => result.push(Version::Unsupported(3)),
            WHITESPACE_TAG_OTRV4 => result.push(Version::Unsupported(4)),
            _ => { /* ignore unknown tags */ }
        }
    }
    result
}
