//! Position keys for ordered sibling lists.
//!
//! Keys are strings over `0-9A-Za-z`. Because that alphabet is laid out in
//! ASCII order, a plain byte-wise comparison of two keys matches their list
//! order, so the store can `ORDER BY position` without any custom collation.
//! Inserting between two neighbours only ever produces a new key; siblings
//! are never renumbered.
//!
//! Generated keys never end in the minimum digit `'0'` (apart from
//! [`LOW_SENTINEL`]). Two distinct keys without a trailing `'0'` always have
//! room for another key between them.

use std::cmp::Ordering;

use thiserror::Error;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const MAX_DIGIT: usize = ALPHABET.len() - 1;
const MID_DIGIT: usize = ALPHABET.len() / 2;
const FIRST_KEY: &str = "aV";

/// Floor returned by [`before`] when no smaller key can be expressed. Sorts
/// below every key produced by [`first`] and [`after`].
pub const LOW_SENTINEL: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FractionalIndexError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

fn digit_index(byte: u8) -> Option<usize> {
    match byte {
        b'0'..=b'9' => Some((byte - b'0') as usize),
        b'A'..=b'Z' => Some((byte - b'A') as usize + 10),
        b'a'..=b'z' => Some((byte - b'a') as usize + 36),
        _ => None,
    }
}

fn decode(key: &str) -> Result<Vec<usize>, FractionalIndexError> {
    key.bytes()
        .map(|byte| {
            digit_index(byte).ok_or_else(|| {
                FractionalIndexError::InvalidArgument(format!(
                    "position key '{key}' contains characters outside 0-9A-Za-z"
                ))
            })
        })
        .collect()
}

fn encode(digits: &[usize]) -> String {
    digits.iter().map(|&digit| ALPHABET[digit] as char).collect()
}

/// The key handed to the first item of an empty list.
pub fn first() -> String {
    FIRST_KEY.to_string()
}

/// A key sorting strictly after `key`. An empty key yields [`first`].
pub fn after(key: &str) -> Result<String, FractionalIndexError> {
    if key.is_empty() {
        return Ok(first());
    }

    Ok(encode(&successor(decode(key)?)))
}

/// Increments the last non-maximum digit and truncates after it. All-maximum
/// (or empty) digits are extended with the middle digit instead.
fn successor(mut digits: Vec<usize>) -> Vec<usize> {
    match digits.iter().rposition(|&digit| digit < MAX_DIGIT) {
        Some(pos) => {
            digits[pos] += 1;
            digits.truncate(pos + 1);
        }
        None => digits.push(MID_DIGIT),
    }
    digits
}

/// A key sorting strictly before `key`. An empty key yields [`first`].
///
/// A key made only of `'0'` characters has no expressible predecessor; in
/// that case (and whenever the decremented key would collapse to nothing)
/// [`LOW_SENTINEL`] is returned.
pub fn before(key: &str) -> Result<String, FractionalIndexError> {
    if key.is_empty() {
        return Ok(first());
    }

    let mut digits = decode(key)?;
    let Some(pos) = digits.iter().rposition(|&digit| digit > 0) else {
        return Ok(LOW_SENTINEL.to_string());
    };
    digits[pos] -= 1;
    while digits.last() == Some(&0) {
        digits.pop();
    }
    if digits.is_empty() {
        return Ok(LOW_SENTINEL.to_string());
    }
    Ok(encode(&digits))
}

/// A key sorting strictly between `lower` and `upper`. A missing (or empty)
/// bound delegates to [`after`] / [`before`].
pub fn between(
    lower: Option<&str>,
    upper: Option<&str>,
) -> Result<String, FractionalIndexError> {
    let lower = lower.filter(|key| !key.is_empty());
    let upper = upper.filter(|key| !key.is_empty());
    match (lower, upper) {
        (None, None) => Ok(first()),
        (Some(lower), None) => after(lower),
        (None, Some(upper)) => before(upper),
        (Some(lower), Some(upper)) => midpoint(lower, upper),
    }
}

fn midpoint(lower: &str, upper: &str) -> Result<String, FractionalIndexError> {
    let low = decode(lower)?;
    let high = decode(upper)?;
    if compare(lower, upper) != Ordering::Less {
        return Err(FractionalIndexError::InvalidArgument(format!(
            "lower bound '{lower}' must sort before upper bound '{upper}'"
        )));
    }

    let shared = low
        .iter()
        .zip(high.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut key = high[..shared].to_vec();

    // `lower` is a proper prefix of `upper`: any non-empty suffix below the
    // rest of `upper` fits.
    if shared == low.len() {
        let suffix = suffix_below(&high[shared..]).ok_or_else(|| {
            FractionalIndexError::InvalidArgument(format!(
                "no position key fits between '{lower}' and '{upper}'"
            ))
        })?;
        key.extend(suffix);
        return Ok(encode(&key));
    }

    let (low_digit, high_digit) = (low[shared], high[shared]);
    if high_digit - low_digit > 1 {
        key.push((low_digit + high_digit) / 2);
    } else if high.len() > shared + 1 {
        key.push(high_digit);
    } else {
        key.push(low_digit);
        key.extend(successor(low[shared + 1..].to_vec()));
    }
    Ok(encode(&key))
}

/// Non-empty digits sorting strictly below `rest`, or `None` when `rest` is a
/// single minimum digit.
fn suffix_below(rest: &[usize]) -> Option<Vec<usize>> {
    let mut suffix = Vec::with_capacity(rest.len() + 1);
    for &digit in rest {
        match digit {
            0 => suffix.push(0),
            1 => {
                suffix.extend([0, MID_DIGIT]);
                return Some(suffix);
            }
            _ => {
                suffix.push(digit / 2);
                return Some(suffix);
            }
        }
    }
    // `rest` is all minimum digits, which generated keys never end in. The
    // only keys below it are its shorter runs of `'0'`.
    suffix.pop();
    (!suffix.is_empty()).then_some(suffix)
}

/// `count` ascending keys between the bounds. Each key becomes the lower
/// bound of the next.
pub fn generate_n(
    lower: Option<&str>,
    upper: Option<&str>,
    count: usize,
) -> Result<Vec<String>, FractionalIndexError> {
    let mut keys = Vec::with_capacity(count);
    let mut previous = lower.map(str::to_owned);
    for _ in 0..count {
        let next = between(previous.as_deref(), upper)?;
        keys.push(next.clone());
        previous = Some(next);
    }
    Ok(keys)
}

pub fn is_valid(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|byte| digit_index(byte).is_some())
}

/// Ordinal comparison. Storage must sort position columns the same way.
pub fn compare(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}
