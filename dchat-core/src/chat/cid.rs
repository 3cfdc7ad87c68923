//! Conversation ids and subject naming
//!
//! ```text
//! <namespace>.dm.<cid>.msg    direct conversation
//! <namespace>.grp.<gid>.msg   group conversation
//! ```
//!
//! The subject prefix alone decides whether an inbound message is treated as
//! direct or group.

use super::error::{ChatError, ChatResult};
use sha2::{Digest, Sha256};

/// Hex characters kept from the conversation hash
pub const CID_LEN: usize = 16;

const DIRECT_SEGMENT: &str = "dm";
const GROUP_SEGMENT: &str = "grp";
const MESSAGE_SUFFIX: &str = "msg";

/// Conversation id shared by `a` and `b`, independent of argument order
pub fn derive_cid(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let digest = Sha256::digest(format!("{}:{}", lo, hi).as_bytes());
    let mut cid = hex::encode(digest);
    cid.truncate(CID_LEN);
    cid
}

/// Group ids become a single subject token
pub fn validate_group_id(gid: &str) -> ChatResult<()> {
    let invalid = gid.is_empty()
        || gid
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace());
    if invalid {
        return Err(ChatError::InvalidGroupId(gid.to_string()));
    }
    Ok(())
}

pub fn direct_subject(namespace: &str, cid: &str) -> String {
    format!("{}.{}.{}.{}", namespace, DIRECT_SEGMENT, cid, MESSAGE_SUFFIX)
}

pub fn group_subject(namespace: &str, gid: &str) -> String {
    format!("{}.{}.{}.{}", namespace, GROUP_SEGMENT, gid, MESSAGE_SUFFIX)
}

/// Pattern matching every direct conversation in `namespace`
pub fn direct_wildcard(namespace: &str) -> String {
    direct_subject(namespace, "*")
}

/// Pattern matching every group conversation in `namespace`
pub fn group_wildcard(namespace: &str) -> String {
    group_subject(namespace, "*")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind<'a> {
    Direct(&'a str),
    Group(&'a str),
}

/// Classify an inbound subject; `None` for anything outside the chat layout
pub fn classify<'a>(namespace: &str, subject: &'a str) -> Option<SubjectKind<'a>> {
    let rest = subject.strip_prefix(namespace)?.strip_prefix('.')?;
    let mut parts = rest.split('.');
    let (kind, id, suffix) = (parts.next()?, parts.next()?, parts.next()?);
    if suffix != MESSAGE_SUFFIX || parts.next().is_some() || id.is_empty() {
        return None;
    }

    match kind {
        DIRECT_SEGMENT => Some(SubjectKind::Direct(id)),
        GROUP_SEGMENT => Some(SubjectKind::Group(id)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cid_shape() {
        let cid = derive_cid("alice", "bob");
        assert_eq!(cid.len(), CID_LEN);
        assert!(cid.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(cid, derive_cid("bob", "alice"));
        assert_ne!(cid, derive_cid("alice", "carol"));
    }

    #[test]
    fn test_cid_is_stable() {
        let expected = &hex::encode(Sha256::digest(b"alice:bob"))[..CID_LEN];
        assert_eq!(derive_cid("bob", "alice"), expected);
    }

    #[test]
    fn test_subjects() {
        assert_eq!(direct_subject("dchat", "abc"), "dchat.dm.abc.msg");
        assert_eq!(group_subject("dchat", "g1"), "dchat.grp.g1.msg");
        assert_eq!(direct_wildcard("dchat"), "dchat.dm.*.msg");
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("dchat", "dchat.dm.abc.msg"), Some(SubjectKind::Direct("abc")));
        assert_eq!(classify("dchat", "dchat.grp.g1.msg"), Some(SubjectKind::Group("g1")));
        assert_eq!(classify("dchat", "other.dm.abc.msg"), None);
        assert_eq!(classify("dchat", "dchatx.dm.abc.msg"), None);
        assert_eq!(classify("dchat", "dchat.dm.abc.msg.extra"), None);
        assert_eq!(classify("dchat", "dchat.kv.abc.msg"), None);
        assert_eq!(classify("dchat", "_INBOX.abc"), None);
    }

    #[test]
    fn test_group_id_validation() {
        assert!(validate_group_id("g1").is_ok());
        assert!(validate_group_id("team-chat_2").is_ok());
        for bad in ["", "a.b", "a*", ">", "a b"] {
            assert_eq!(validate_group_id(bad), Err(ChatError::InvalidGroupId(bad.to_string())));
        }
    }

    proptest! {
        #[test]
        fn prop_cid_symmetric(a in ".{0,24}", b in ".{0,24}") {
            prop_assert_eq!(derive_cid(&a, &b), derive_cid(&b, &a));
        }
    }
}
