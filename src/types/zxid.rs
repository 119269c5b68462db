use std::fmt;

/// A transaction id.
///
/// The upper 32 bits hold the leader epoch, the lower 32 bits a counter that restarts at 1 with
/// every new epoch. Comparing two zxids as plain integers gives the commit order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Zxid(u64);

impl Zxid {
    /// The id "before" any transaction. An empty tree has applied everything up to here.
    pub const ZERO: Zxid = Zxid(0);

    /// Build a zxid from its epoch and counter halves.
    pub fn new(epoch: u32, counter: u32) -> Self {
        Zxid((u64::from(epoch) << 32) | u64::from(counter))
    }

    /// Reinterpret a raw 64-bit value (as stored on disk) as a zxid.
    pub fn from_raw(raw: u64) -> Self {
        Zxid(raw)
    }

    /// The raw 64-bit value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// The value as it appears in a [`Stat`](crate::Stat).
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// The leader epoch that issued this zxid.
    pub fn epoch(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The position of this zxid within its epoch.
    pub fn counter(self) -> u32 {
        self.0 as u32
    }

    /// The next zxid in the same epoch, or `None` if the counter is exhausted and the leader has
    /// to move to a new epoch.
    pub fn next_in_epoch(self) -> Option<Zxid> {
        self.counter()
            .checked_add(1)
            .map(|counter| Zxid::new(self.epoch(), counter))
    }

    /// The smallest zxid strictly greater than this one. Used as an inclusive lower bound when
    /// reading the log "after" a position.
    pub(crate) fn after(self) -> Zxid {
        Zxid(self.0.saturating_add(1))
    }

    /// True if `self` may directly follow `prev` in the log without a gap.
    pub fn follows(self, prev: Zxid) -> bool {
        if self.epoch() == prev.epoch() {
            u64::from(self.counter()) == u64::from(prev.counter()) + 1
        } else {
            self.epoch() > prev.epoch() && self.counter() == 1
        }
    }
}

impl fmt::Display for Zxid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves() {
        let z = Zxid::new(3, 17);
        assert_eq!(z.epoch(), 3);
        assert_eq!(z.counter(), 17);
        assert_eq!(Zxid::from_raw(z.raw()), z);
        assert!(Zxid::new(2, 900) < Zxid::new(3, 1));
    }

    #[test]
    fn continuity() {
        assert!(Zxid::new(1, 1).follows(Zxid::ZERO));
        assert!(Zxid::new(1, 2).follows(Zxid::new(1, 1)));
        assert!(Zxid::new(4, 1).follows(Zxid::new(1, 9)));
        assert!(!Zxid::new(1, 3).follows(Zxid::new(1, 1)));
        assert!(!Zxid::new(2, 2).follows(Zxid::new(1, 9)));
        assert!(!Zxid::new(1, 1).follows(Zxid::new(2, 1)));
    }

    #[test]
    fn counter_exhaustion() {
        assert_eq!(Zxid::new(1, u32::MAX).next_in_epoch(), None);
        assert_eq!(Zxid::new(1, 5).next_in_epoch(), Some(Zxid::new(1, 6)));
        assert_eq!(format!("{}", Zxid::new(1, 2)), "0x100000002");
    }
}
