//! Long and short upload identifiers.
//!
//! A long id is 12 bytes rendered as 24 lowercase hex characters:
//!
//! ```text
//! | 4 bytes seconds (BE) | 5 bytes generator discriminator | 3 bytes counter (BE) |
//! ```
//!
//! The discriminator is drawn once per generator, the counter starts at a
//! random value and wraps at 2^24. Short ids are random and URL-safe; their
//! uniqueness is checked by the pipeline against the metadata store.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use rand::{Rng, RngCore};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

const LONG_ID_BYTES: usize = 12;
const COUNTER_MASK: u32 = 0x00FF_FFFF;
const MAX_SHORT_ID_LEN: usize = 64;

/// Primary identifier of an upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LongId(String);

impl LongId {
    fn from_bytes(bytes: [u8; LONG_ID_BYTES]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in the first four bytes
    pub fn timestamp(&self) -> DateTime<Utc> {
        let mut secs = [0u8; 4];
        // Constructors guarantee 24 valid hex characters
        if hex::decode_to_slice(&self.0[..8], &mut secs).is_err() {
            return DateTime::<Utc>::UNIX_EPOCH;
        }
        Utc.timestamp_opt(i64::from(u32::from_be_bytes(secs)), 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl fmt::Display for LongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid long id: {0:?}")]
pub struct InvalidLongId(pub String);

impl FromStr for LongId {
    type Err = InvalidLongId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; LONG_ID_BYTES];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidLongId(s.to_string()))?;
        Ok(Self::from_bytes(bytes))
    }
}

/// Generator for [`LongId`]s, safe to share across tasks
pub struct LongIdGenerator {
    discriminator: [u8; 5],
    counter: AtomicU32,
}

impl LongIdGenerator {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            discriminator: rng.gen(),
            counter: AtomicU32::new(rng.gen::<u32>() & COUNTER_MASK),
        }
    }

    pub fn next_id(&self) -> LongId {
        let secs = Utc::now().timestamp() as u32;
        let count = self.counter.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;

        let mut bytes = [0u8; LONG_ID_BYTES];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.discriminator);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);

        LongId::from_bytes(bytes)
    }
}

impl Default for LongIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Public, URL-safe identifier of an upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortId(String);

impl ShortId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `candidate` could have been issued as a short id
    pub fn is_well_formed(candidate: &str) -> bool {
        !candidate.is_empty()
            && candidate.len() <= MAX_SHORT_ID_LEN
            && candidate
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of short id candidates
pub trait ShortIdSource: Send + Sync {
    fn next_short_id(&self) -> ShortId;
}

/// Random short ids: `num_bytes` random bytes in unpadded base64url
#[derive(Debug, Clone)]
pub struct RandomShortIds {
    num_bytes: usize,
}

impl RandomShortIds {
    pub fn new(num_bytes: usize) -> Self {
        Self {
            num_bytes: num_bytes.max(1),
        }
    }
}

impl ShortIdSource for RandomShortIds {
    fn next_short_id(&self) -> ShortId {
        let mut buf = vec![0u8; self.num_bytes];
        rand::thread_rng().fill_bytes(&mut buf);
        ShortId(URL_SAFE_NO_PAD.encode(buf))
    }
}
