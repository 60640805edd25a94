use std::collections::HashMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use cxo_types::{Hash, PubKey, Sig};

/// Bytes a root record occupies beyond its payload: `prev`, `hash`, `sig`
/// and the 8-byte sequence number.
pub const ROOT_OVERHEAD: u64 = (Hash::LEN * 2 + Sig::LEN + 8) as u64;

/// A byte count with a human-readable display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Space(pub u64);

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
        if self.0 < 1024 {
            return write!(f, "{} B", self.0);
        }
        let mut value = self.0 as f64 / 1024.0;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        write!(f, "{value:.2} {}", UNITS[unit])
    }
}

impl Add for Space {
    type Output = Space;

    fn add(self, rhs: Space) -> Space {
        Space(self.0 + rhs.0)
    }
}

impl AddAssign for Space {
    fn add_assign(&mut self, rhs: Space) {
        self.0 += rhs.0;
    }
}

impl Sum for Space {
    fn sum<I: Iterator<Item = Space>>(iter: I) -> Space {
        iter.fold(Space::default(), Add::add)
    }
}

/// Snapshot of a single feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStat {
    /// Number of root records.
    pub roots: usize,
    /// Payload bytes plus [`ROOT_OVERHEAD`] per record.
    pub space: Space,
}

/// Snapshot of the whole store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    /// Number of objects.
    pub objects: usize,
    /// Total object bytes.
    pub space: Space,
    /// Per-feed statistics, one entry per registered feed.
    pub feeds: HashMap<PubKey, FeedStat>,
}

impl Stat {
    /// Total root records across all feeds.
    pub fn roots(&self) -> usize {
        self.feeds.values().map(|fs| fs.roots).sum()
    }

    /// Object space plus the space of every feed.
    pub fn total_space(&self) -> Space {
        self.space + self.feeds.values().map(|fs| fs.space).sum::<Space>()
    }
}
