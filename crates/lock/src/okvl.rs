//! Orthogonal key-value locking: a lock mode is a pair of independent
//! strengths, one on the key itself and one on the gap between the key
//! and its right neighbor. Range scans take a lock that covers both
//! (phantom protection); point reads/writes take a key-only lock and
//! leave the gap open for concurrent inserts; an insert into a gap takes
//! a gap-only lock and leaves the neighboring keys untouched.
//!
//! Grounded on spec §4.D ("Key-range (OKVL) + intent locks"); intent
//! locks (`IS`/`IX`/`SIX`) are a separate, coarser lattice that applies at
//! store granularity and is not modeled here — this module covers only
//! the per-key/per-gap lattice.

/// One axis of an orthogonal lock: the strength held on either the key
/// itself or its right gap, independently of the other axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Component {
    N,
    S,
    X,
}

impl Component {
    fn compatible_with(self, other: Component) -> bool {
        use Component::*;
        !matches!((self, other), (X, S) | (X, X) | (S, X))
    }

    fn subsumes(self, other: Component) -> bool {
        use Component::*;
        matches!((self, other), (X, _) | (S, S) | (S, N) | (N, N))
    }

    fn strongest(self, other: Component) -> Component {
        use Component::*;
        match (self, other) {
            (X, _) | (_, X) => X,
            (S, _) | (_, S) => S,
            _ => N,
        }
    }
}

/// A key-range lock mode: independent strength on the key and on its
/// gap. Compatibility and subsumption are checked componentwise, which is
/// what makes the lattice "orthogonal" — a lock that only touches the key
/// never conflicts with one that only touches the gap, even on the same
/// key, because they cover disjoint resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockMode {
    key: Component,
    gap: Component,
}

impl LockMode {
    /// No lock on either axis.
    pub const N: LockMode = LockMode { key: Component::N, gap: Component::N };
    /// Read the key itself; the gap to the next key stays open for
    /// concurrent inserts.
    pub const S: LockMode = LockMode { key: Component::S, gap: Component::N };
    /// Modify the key itself; the gap stays open.
    pub const X: LockMode = LockMode { key: Component::X, gap: Component::N };
    /// Gap-only exclusive: locks the space between this key and its
    /// successor without touching the key, for inserting a new key into
    /// that gap.
    pub const INSERT: LockMode = LockMode { key: Component::N, gap: Component::X };
    /// Next-key share: key and gap together, giving a range scan phantom
    /// protection from a single lock.
    pub const RANGE_S: LockMode = LockMode { key: Component::S, gap: Component::S };
    /// Next-key exclusive: key and gap together, blocking concurrent
    /// reads, inserts, and updates across the covered range.
    pub const RANGE_X: LockMode = LockMode { key: Component::X, gap: Component::X };

    /// Whether a holder of `self` and a holder of `other` can both be
    /// granted at once, checked independently on each axis.
    pub fn compatible_with(self, other: LockMode) -> bool {
        self.key.compatible_with(other.key) && self.gap.compatible_with(other.gap)
    }

    /// Whether `self` is already at least as strong as `other` on both
    /// axes (used to skip a redundant re-acquire).
    pub fn subsumes(self, other: LockMode) -> bool {
        self.key.subsumes(other.key) && self.gap.subsumes(other.gap)
    }

    /// The per-axis strongest of two modes held/requested together by the
    /// same transaction.
    pub fn strongest(self, other: LockMode) -> LockMode {
        LockMode {
            key: self.key.strongest(other.key),
            gap: self.gap.strongest(other.gap),
        }
    }
}
