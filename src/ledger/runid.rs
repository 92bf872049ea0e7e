//! SF-014: Run identifiers and audit timestamps.
//!
//! A run id is the local timestamp to the microsecond followed by two
//! random decimal digits: `YYYYMMDDHHMMSSffffff` + `d1` + `d2`. Collisions
//! within one microsecond are unlikely but possible.

use chrono::{DateTime, Local};
use rand::Rng;
use std::fmt;

const STAMP: &str = "%Y%m%d%H%M%S%6f";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    /// New id from the clock and the thread RNG.
    pub fn generate() -> Self {
        Self::with_rng(Local::now(), &mut rand::rng())
    }

    /// New id for a given instant.
    pub fn with_rng<R: Rng>(at: DateTime<Local>, rng: &mut R) -> Self {
        let d1 = rng.random_range(0..10u8);
        let d2 = rng.random_range(0..10u8);
        Self::from_parts(&at.format(STAMP).to_string(), d1, d2)
    }

    pub fn from_parts(stamp: &str, d1: u8, d2: u8) -> Self {
        Self(format!("{}{}{}", stamp, d1 % 10, d2 % 10))
    }

    /// Accept an externally supplied id (e.g. `audit --run-id`).
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("run id must be decimal digits: '{}'", s));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Audit event time: `YYYY-MM-DD HH:MM:SS.ffffff`, local.
pub fn load_time() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}
