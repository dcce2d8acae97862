//! Fractional position keys for the shared ordered collection.
//!
//! A key is a non-empty string over the base-62 alphabet
//! `0-9A-Za-z`, read as the digits of a fraction in (0, 1). The alphabet
//! is in ASCII order, so plain string comparison is numeric comparison.
//! Keys never end in the zero digit, which guarantees that a key strictly
//! between any two distinct keys exists without touching either of them.
//!
//! ```text
//!   None ── "8" ── "G" ── "G8" ── "V" ── None
//!          before      between         after
//! ```
//!
//! Appends and prepends move a fixed number of digits away from the
//! nearest key (the "step") so long runs of appends stay short. Inserts
//! between two keys take the midpoint.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: u8 = 62;

/// Default distance, in digits, between a new extremity key and its
/// neighbor.
pub const DEFAULT_STEP: u8 = 8;

/// Totally ordered, dense position key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionKey(String);

impl PositionKey {
    /// Parse and validate a key.
    pub fn parse(key: impl Into<String>) -> Result<Self, CoreError> {
        let key = key.into();
        decode(&key)?;
        Ok(Self(key))
    }

    /// The key used for the first element of an empty collection.
    pub fn first() -> Self {
        Self(encode(&midpoint(&[], None)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A key strictly between `lower` and `upper`; `None` means unbounded.
    ///
    /// Fails if both bounds are present and `lower >= upper`, or if either
    /// bound is malformed.
    pub fn between(
        lower: Option<&PositionKey>,
        upper: Option<&PositionKey>,
        step: u8,
    ) -> Result<PositionKey, CoreError> {
        let step = step.clamp(1, BASE - 1);
        let digits = match (lower, upper) {
            (None, None) => midpoint(&[], None),
            (Some(a), None) => after(&decode(&a.0)?, step),
            (None, Some(b)) => before(&decode(&b.0)?, step),
            (Some(a), Some(b)) => {
                check_ordered(a, b)?;
                midpoint(&decode(&a.0)?, Some(&decode(&b.0)?))
            }
        };
        Ok(Self(encode(&digits)))
    }

    /// `count` distinct, ascending keys strictly between `lower` and `upper`.
    pub fn n_between(
        lower: Option<&PositionKey>,
        upper: Option<&PositionKey>,
        count: usize,
        step: u8,
    ) -> Result<Vec<PositionKey>, CoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let step = step.clamp(1, BASE - 1);
        let mut keys = Vec::with_capacity(count);

        match (lower, upper) {
            (lower, None) => {
                let mut current = match lower {
                    Some(a) => after(&decode(&a.0)?, step),
                    None => midpoint(&[], None),
                };
                keys.push(current.clone());
                for _ in 1..count {
                    current = after(&current, step);
                    keys.push(current.clone());
                }
            }
            (None, Some(b)) => {
                let mut current = before(&decode(&b.0)?, step);
                keys.push(current.clone());
                for _ in 1..count {
                    current = before(&current, step);
                    keys.push(current.clone());
                }
                keys.reverse();
            }
            (Some(a), Some(b)) => {
                check_ordered(a, b)?;
                bisect(&decode(&a.0)?, &decode(&b.0)?, count, &mut keys);
            }
        }

        Ok(keys.into_iter().map(|d| Self(encode(&d))).collect())
    }
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn check_ordered(a: &PositionKey, b: &PositionKey) -> Result<(), CoreError> {
    if a >= b {
        return Err(CoreError::UnorderedBounds {
            lower: a.0.clone(),
            upper: b.0.clone(),
        });
    }
    Ok(())
}

fn decode(key: &str) -> Result<Vec<u8>, CoreError> {
    let invalid = || CoreError::InvalidPositionKey(key.to_string());
    if key.is_empty() || key.ends_with('0') {
        return Err(invalid());
    }
    key.bytes()
        .map(|c| match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'A'..=b'Z' => Ok(c - b'A' + 10),
            b'a'..=b'z' => Ok(c - b'a' + 36),
            _ => Err(invalid()),
        })
        .collect()
}

fn encode(digits: &[u8]) -> String {
    digits.iter().map(|&d| DIGITS[d as usize] as char).collect()
}

/// Digits of a fraction strictly between `a` and `b` (`None` = 1).
///
/// Requires `a < b` and neither ending in zero; `a` may be empty (= 0).
fn midpoint(a: &[u8], b: Option<&[u8]>) -> Vec<u8> {
    if let Some(b) = b {
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(0) == b[n] {
            n += 1;
        }
        if n > 0 {
            let mut out = b[..n].to_vec();
            out.extend(midpoint(a.get(n..).unwrap_or(&[]), Some(&b[n..])));
            return out;
        }
    }

    let digit_a = a.first().copied().unwrap_or(0);
    let digit_b = b.map(|b| b[0]).unwrap_or(BASE);
    if digit_b - digit_a > 1 {
        return vec![(digit_a + digit_b) / 2];
    }

    // Consecutive leading digits.
    if let Some(b) = b {
        if b.len() > 1 {
            return vec![b[0]];
        }
    }
    let mut out = vec![digit_a];
    out.extend(midpoint(a.get(1..).unwrap_or(&[]), None));
    out
}

fn after(a: &[u8], step: u8) -> Vec<u8> {
    for (i, &digit) in a.iter().enumerate() {
        if digit + step < BASE {
            let mut out = a[..i].to_vec();
            out.push(digit + step);
            return out;
        }
    }
    let mut out = a.to_vec();
    out.push(step);
    out
}

fn before(b: &[u8], step: u8) -> Vec<u8> {
    if b[0] > step {
        return vec![b[0] - step];
    }
    midpoint(&[], Some(b))
}

fn bisect(a: &[u8], b: &[u8], count: usize, out: &mut Vec<Vec<u8>>) {
    if count == 0 {
        return;
    }
    let mid = midpoint(a, Some(b));
    let left = count / 2;
    bisect(a, &mid, left, out);
    out.push(mid.clone());
    bisect(&mid, b, count - left - 1, out);
}
