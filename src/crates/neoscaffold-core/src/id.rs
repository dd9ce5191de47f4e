//! Time-ordered 20 character identifiers
//!
//! Identifiers are 8 characters of millisecond timestamp followed by 12
//! characters of randomness. Both halves use an ASCII-ordered 64 character
//! alphabet, so plain string comparison sorts identifiers by creation time.
//! Identifiers created within the same millisecond reuse the previous random
//! suffix incremented by one, which keeps them strictly increasing.

use crate::error::{Result, ScaffoldError};
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;

/// Alphabet used for both halves of an identifier, in ASCII order.
pub const PUSH_CHARS: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Total identifier length.
pub const ID_LENGTH: usize = 20;

const TIMESTAMP_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

#[derive(Debug, Default)]
struct PushState {
    last_push_time: Option<i64>,
    last_rand_chars: [u8; RANDOM_CHARS],
}

/// Generator for sortable identifiers.
///
/// Safe to share between tasks; the last timestamp and random suffix live
/// behind a mutex.
#[derive(Debug, Default)]
pub struct IdGenerator {
    state: Mutex<PushState>,
}

impl IdGenerator {
    /// Create a generator with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate an identifier for the current wall-clock millisecond.
    pub fn generate(&self) -> Result<String> {
        self.generate_at(Utc::now().timestamp_millis())
    }

    /// Generate an identifier for an explicit millisecond timestamp.
    pub fn generate_at(&self, now_ms: i64) -> Result<String> {
        if now_ms < 0 {
            return Err(ScaffoldError::Invariant(format!(
                "negative timestamp {} cannot be encoded",
                now_ms
            )));
        }

        let mut timestamp = [0u8; TIMESTAMP_CHARS];
        let mut now = now_ms;
        for slot in timestamp.iter_mut().rev() {
            *slot = PUSH_CHARS[(now % 64) as usize];
            now /= 64;
        }
        if now != 0 {
            return Err(ScaffoldError::Invariant(
                "timestamp does not fit in 8 characters".to_string(),
            ));
        }

        let mut state = self.state.lock();
        let duplicate = state.last_push_time == Some(now_ms);
        state.last_push_time = Some(now_ms);

        if duplicate {
            increment_suffix(&mut state.last_rand_chars)?;
        } else {
            let mut rng = rand::thread_rng();
            for digit in state.last_rand_chars.iter_mut() {
                *digit = rng.gen_range(0..64);
            }
        }

        let mut id = String::with_capacity(ID_LENGTH);
        id.extend(timestamp.iter().map(|&c| c as char));
        id.extend(
            state
                .last_rand_chars
                .iter()
                .map(|&digit| PUSH_CHARS[digit as usize] as char),
        );

        if id.len() != ID_LENGTH {
            return Err(ScaffoldError::Invariant(format!(
                "identifier length should be {}, got {}",
                ID_LENGTH,
                id.len()
            )));
        }

        Ok(id)
    }
}

/// Add one to a base-64 counter stored most-significant digit first.
fn increment_suffix(digits: &mut [u8; RANDOM_CHARS]) -> Result<()> {
    for digit in digits.iter_mut().rev() {
        if *digit == 63 {
            *digit = 0;
        } else {
            *digit += 1;
            return Ok(());
        }
    }
    Err(ScaffoldError::Invariant(
        "random suffix exhausted within one millisecond".to_string(),
    ))
}
