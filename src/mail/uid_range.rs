//! Compact UID set addressing.
//!
//! A mailbox's UIDs are sparse, so two selected UIDs can only share a range
//! token when no *existing* unselected UID lies between them. Numeric
//! closeness is irrelevant: `2` and `9` merge into `2:9` when `3..=8` are
//! absent from the mailbox, while `4` and `5` stay apart when only one of
//! them is selected.

use std::fmt;

use thiserror::Error;

/// One element of a UID set: a single UID or a closed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidToken {
    Single(u32),
    Range(u32, u32),
}

impl fmt::Display for UidToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UidToken::Single(uid) => write!(f, "{}", uid),
            UidToken::Range(lo, hi) => write!(f, "{}:{}", lo, hi),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("cannot address {0} selected UIDs in an empty mailbox")]
    EmptyMailbox(usize),
    #[error("selected UID {0} is not present in the mailbox")]
    NotInMailbox(u32),
    #[error("malformed UID set token '{0}'")]
    MalformedToken(String),
}

/// Compress `selected` into the fewest tokens, given every UID in the
/// mailbox in ascending order.
///
/// Tokens are emitted while walking `selected` from its maximum down, so the
/// returned list is in descending order.
pub fn compress(all_sorted: &[u32], selected: &[u32]) -> Result<Vec<UidToken>, RangeError> {
    if selected.is_empty() {
        return Ok(Vec::new());
    }
    if all_sorted.is_empty() {
        return Err(RangeError::EmptyMailbox(selected.len()));
    }

    let mut tokens = Vec::new();
    // (low index, high index) into all_sorted of the run being built
    let mut run: Option<(usize, usize)> = None;

    for &uid in selected.iter().rev() {
        let idx = all_sorted
            .binary_search(&uid)
            .map_err(|_| RangeError::NotInMailbox(uid))?;

        run = match run {
            Some((lo, hi)) if lo == idx + 1 => Some((idx, hi)),
            Some(pending) => {
                tokens.push(token_for(all_sorted, pending));
                Some((idx, idx))
            }
            None => Some((idx, idx)),
        };
    }

    if let Some(pending) = run {
        tokens.push(token_for(all_sorted, pending));
    }

    Ok(tokens)
}

fn token_for(all_sorted: &[u32], (lo, hi): (usize, usize)) -> UidToken {
    if lo == hi {
        UidToken::Single(all_sorted[lo])
    } else {
        UidToken::Range(all_sorted[lo], all_sorted[hi])
    }
}

/// Render tokens as an IMAP sequence set (`"9,5,2:3"`).
pub fn serialize(tokens: &[UidToken]) -> String {
    tokens
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse an IMAP sequence set back into tokens. `*` is not supported.
pub fn parse(set: &str) -> Result<Vec<UidToken>, RangeError> {
    let parse_uid = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| RangeError::MalformedToken(s.to_string()))
    };

    set.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| match part.split_once(':') {
            Some((lo, hi)) => {
                let (a, b) = (parse_uid(lo)?, parse_uid(hi)?);
                Ok(UidToken::Range(a.min(b), a.max(b)))
            }
            None => parse_uid(part).map(UidToken::Single),
        })
        .collect()
}

/// Resolve tokens against the mailbox contents, returning the addressed
/// UIDs in ascending order. A range covers only UIDs that exist.
pub fn expand(all_sorted: &[u32], tokens: &[UidToken]) -> Vec<u32> {
    all_sorted
        .iter()
        .copied()
        .filter(|uid| {
            tokens.iter().any(|t| match *t {
                UidToken::Single(u) => u == *uid,
                UidToken::Range(lo, hi) => (lo..=hi).contains(uid),
            })
        })
        .collect()
}
