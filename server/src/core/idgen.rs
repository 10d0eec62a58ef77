//! Process-unique identifier generation
//!
//! Snowflake-style layout: elapsed 10 ms units since a configured epoch in
//! the high bits, then a per-unit sequence, then the node identifier.
//! Uniqueness is what callers rely on; ids are also monotonically increasing
//! within a process, which keeps them usable as event ordering hints.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;

use super::config::IdGenConfig;
use crate::utils::base62;

/// Bits reserved for the elapsed-time component (~174 years of 10 ms units)
const TIME_BITS: u32 = 39;

/// Size of one time unit
const TIME_UNIT_MS: u64 = 10;

#[derive(Default)]
struct State {
    last_units: u64,
    seq: u32,
}

/// Generator of unique 64-bit identifiers
pub struct IdGen {
    epoch_ms: u64,
    node: u16,
    node_bits: u32,
    seq_bits: u32,
    seq_mask: u32,
    state: Mutex<State>,
}

impl IdGen {
    /// Create a generator from validated configuration.
    ///
    /// A configured node of 0 picks a random node in `[0, 256)` so that
    /// unconfigured processes still get distinct id spaces with high
    /// probability.
    pub fn new(config: &IdGenConfig) -> Self {
        let node = if config.node == 0 {
            rand::thread_rng().gen_range(0..256)
        } else {
            config.node
        };
        let node_bits = u32::from(config.node_bits);
        let seq_bits = 63 - TIME_BITS - node_bits;
        Self {
            epoch_ms: (config.epoch_time_in_seconds as u64) * 1000,
            node,
            node_bits,
            seq_bits,
            seq_mask: (1 << seq_bits) - 1,
            state: Mutex::new(State::default()),
        }
    }

    /// Allocate the next identifier.
    pub fn next(&self) -> i64 {
        let mut state = self.state.lock();
        let mut units = self.elapsed_units();
        if units < state.last_units {
            // Wall clock moved backwards; stay on the last unit and let the
            // sequence absorb the skew.
            units = state.last_units;
        }

        if units == state.last_units {
            state.seq = (state.seq + 1) & self.seq_mask;
            if state.seq == 0 {
                // Sequence exhausted for this unit; wait for the next one.
                while units <= state.last_units {
                    thread::sleep(Duration::from_millis(1));
                    units = self.elapsed_units();
                }
                state.last_units = units;
            }
        } else {
            state.last_units = units;
            state.seq = 0;
        }

        ((state.last_units as i64) << (self.seq_bits + self.node_bits))
            | (i64::from(state.seq) << self.node_bits)
            | i64::from(self.node)
    }

    /// Allocate the next identifier in its base-62 string form.
    pub fn next_string(&self) -> String {
        base62::encode_id(self.next())
    }

    /// The node identifier embedded in every generated id.
    pub fn node(&self) -> u16 {
        self.node
    }

    fn elapsed_units(&self) -> u64 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        now_ms.saturating_sub(self.epoch_ms) / TIME_UNIT_MS
    }
}

/// Whether a string is a well-formed base-62 identifier
pub fn valid_string_id(s: &str) -> bool {
    s.len() == base62::ID_STRING_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}
