//! Identifier classification.
//!
//! A user-visible identifier is one of:
//! - *txid*: 64 lowercase hex characters;
//! - *nametag id*: `~name` for the latest revision or `N~name` for revision
//!   `N` (decimal);
//! - *path id*: either of the above followed by `/` and a path.
//!
//! Path parsing is leftmost-first: the first `/` splits the inner id from the
//! path (names cannot contain `/`, so the split is unambiguous).

use core::fmt;
use core::str::FromStr;

use crate::error::Error;
use crate::protocol::{NAMETAG_PREFIX, NAME_MAX_LEN, TXID_CHARS};

/// A classified identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// Direct transaction id.
    Txid(String),
    /// Nametag reference; `rev = None` means the latest revision.
    Nametag { rev: Option<u32>, name: String },
    /// Identifier plus a path into its directory index.
    Path { inner: Box<Identifier>, path: String },
}

impl Identifier {
    /// Splits off a path component, if any, and classifies the rest.
    fn parse_inner(s: &str) -> Option<Identifier> {
        if is_valid_txid(s) {
            return Some(Identifier::Txid(s.to_owned()));
        }
        parse_nametag(s)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Txid(txid) => f.write_str(txid),
            Identifier::Nametag { rev: None, name } => write!(f, "{NAMETAG_PREFIX}{name}"),
            Identifier::Nametag { rev: Some(rev), name } => {
                write!(f, "{rev}{NAMETAG_PREFIX}{name}")
            }
            Identifier::Path { inner, path } => write!(f, "{inner}/{path}"),
        }
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if let Some(id) = Identifier::parse_inner(s) {
            return Ok(id);
        }
        if let Some(slash) = s.find('/') {
            let (inner, path) = (&s[..slash], &s[slash + 1..]);
            if let Some(inner) = Identifier::parse_inner(inner) {
                return Ok(Identifier::Path {
                    inner: Box::new(inner),
                    path: path.to_owned(),
                });
            }
        }
        Err(Error::BadCall(format!("invalid identifier: {s}")))
    }
}

/// True for a well-formed transaction id (64 lowercase hex chars).
pub fn is_valid_txid(s: &str) -> bool {
    s.len() == TXID_CHARS
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// True for a usable nametag name: 1..=64 bytes, no slash, no NUL.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= NAME_MAX_LEN
        && !name.contains('/')
        && !name.contains('\0')
}

/// Parses `~name` / `N~name`; `None` if the string is not a nametag id.
fn parse_nametag(s: &str) -> Option<Identifier> {
    let tilde = s.find(NAMETAG_PREFIX)?;
    let (rev_str, name) = (&s[..tilde], &s[tilde + 1..]);
    if !is_valid_name(name) {
        return None;
    }
    let rev = if rev_str.is_empty() {
        None
    } else if rev_str.bytes().all(|b| b.is_ascii_digit()) {
        Some(rev_str.parse().ok()?)
    } else {
        return None;
    };
    Some(Identifier::Nametag {
        rev,
        name: name.to_owned(),
    })
}

/// True for any well-formed cashweb identifier (txid, nametag, or path form).
/// Directory index resolution lines are recognised with this.
pub fn is_valid_cashweb_id(s: &str) -> bool {
    Identifier::from_str(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: &str = "aa4d10ccff6dc33b21b6bd7ba79e14073df1e9b13cd46bbd42e8816394b755d2";

    #[test]
    fn classifies_txid() {
        assert_eq!(
            Identifier::from_str(TXID).unwrap(),
            Identifier::Txid(TXID.to_owned())
        );
        assert!(!is_valid_txid("AA4D10CCFF6DC33B21B6BD7BA79E14073DF1E9B13CD46BBD42E8816394B755D2"));
        assert!(!is_valid_txid(&TXID[..62]));
    }

    #[test]
    fn classifies_nametag_latest_and_revision() {
        assert_eq!(
            Identifier::from_str("~coolname").unwrap(),
            Identifier::Nametag { rev: None, name: "coolname".to_owned() }
        );
        assert_eq!(
            Identifier::from_str("3~coolname").unwrap(),
            Identifier::Nametag { rev: Some(3), name: "coolname".to_owned() }
        );
        assert!(Identifier::from_str("x~coolname").is_err());
        assert!(Identifier::from_str("~").is_err());
    }

    #[test]
    fn classifies_path_ids_leftmost_first() {
        let id = Identifier::from_str("~site/css/main.css").unwrap();
        match id {
            Identifier::Path { inner, path } => {
                assert_eq!(
                    *inner,
                    Identifier::Nametag { rev: None, name: "site".to_owned() }
                );
                assert_eq!(path, "css/main.css");
            }
            other => panic!("expected path id, got {other:?}"),
        }

        let id = Identifier::from_str(&format!("{TXID}/index.html")).unwrap();
        match id {
            Identifier::Path { inner, path } => {
                assert_eq!(*inner, Identifier::Txid(TXID.to_owned()));
                assert_eq!(path, "index.html");
            }
            other => panic!("expected path id, got {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_names() {
        let long = "a".repeat(NAME_MAX_LEN + 1);
        assert!(Identifier::from_str(&format!("~{long}")).is_err());
        assert!(is_valid_name(&"a".repeat(NAME_MAX_LEN)));
    }
}
