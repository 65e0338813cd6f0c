//! Node identifiers.
//!
//! Ids are shaped `{session}.{clock}`. The session prefix is the time elapsed
//! since the document root was created plus a short random salt, and the clock
//! is a per-document counter. Both use a 64 symbol alphabet whose symbols are
//! in ASCII order, so within one session a later id never sorts before an
//! earlier one of the same clock width (see [`compare_ids`] for the full order).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// RFC 4648 §5 symbols, re-ordered by code point.
const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const FIRST: u8 = ALPHABET[0];
const SALT_LEN: usize = 3;

/// Opaque, immutable node identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generate a fresh root id (time-ordered UUIDv7, lower-case, no dashes)
pub fn new_root_id() -> NodeId {
    NodeId(Uuid::now_v7().simple().to_string())
}

/// Unix milliseconds embedded in a UUIDv7 root id, if it is one
pub fn root_created_at(root: &NodeId) -> Option<i64> {
    let uuid = Uuid::parse_str(root.as_str()).ok()?;
    if uuid.get_version_num() != 7 {
        return None;
    }
    let bytes = uuid.as_bytes();
    let millis = bytes[..6]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    i64::try_from(millis).ok()
}

/// Sequential id generator for the nodes of one document session
#[derive(Debug, Clone)]
pub struct IdGenerator {
    session: String,
    clock: Vec<u8>,
}

impl IdGenerator {
    /// Create a generator for a document whose root was created at
    /// `root_created_at` (unix millis). A missing creation time counts as now.
    pub fn new(root_created_at: Option<i64>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let elapsed = now.saturating_sub(root_created_at.unwrap_or(now)).max(0);
        let mut session = encode_number(elapsed as u64);
        session.push_str(&random_salt(SALT_LEN));
        Self::from_session(session)
    }

    /// Create a generator with a fixed session prefix
    pub fn from_session(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            clock: vec![FIRST],
        }
    }

    /// Generate the next id
    pub fn new_id(&mut self) -> NodeId {
        let clock = String::from_utf8_lossy(&self.clock);
        let id = NodeId(format!("{}.{}", self.session, clock));
        self.clock = increment(&self.clock);
        id
    }

    pub fn session(&self) -> &str {
        &self.session
    }
}

/// Total order consistent with generation order within a session: sessions
/// compare lexicographically, clocks by width and then lexicographically.
pub fn compare_ids(a: &NodeId, b: &NodeId) -> Ordering {
    let (session_a, clock_a) = split(a.as_str());
    let (session_b, clock_b) = split(b.as_str());
    session_a
        .cmp(session_b)
        .then(clock_a.len().cmp(&clock_b.len()))
        .then(clock_a.cmp(clock_b))
}

fn split(id: &str) -> (&str, &str) {
    id.rsplit_once('.').unwrap_or((id, ""))
}

fn digit(symbol: u8) -> Option<usize> {
    ALPHABET.iter().position(|&s| s == symbol)
}

fn encode_number(mut num: u64) -> String {
    if num == 0 {
        return (FIRST as char).to_string();
    }
    let mut out = Vec::new();
    while num > 0 {
        out.push(ALPHABET[(num % 64) as usize]);
        num /= 64;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn random_salt(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn increment(clock: &[u8]) -> Vec<u8> {
    let mut next = clock.to_vec();
    for i in (0..next.len()).rev() {
        // Clocks are only ever produced by this module.
        let idx = digit(next[i]).unwrap_or(0);
        if idx != ALPHABET.len() - 1 {
            next[i] = ALPHABET[idx + 1];
            for tail in next.iter_mut().skip(i + 1) {
                *tail = FIRST;
            }
            return next;
        }
    }
    // every digit was at its max: carry into a new leading digit
    let mut grown = Vec::with_capacity(next.len() + 1);
    grown.push(ALPHABET[1]);
    grown.extend(std::iter::repeat(FIRST).take(next.len()));
    grown
}
