//! The ownership privilege lattice.
//!
//! `Unused ⊑ ImmutableBorrow ⊑ MutableBorrow ⊑ Moved`. Every binding and
//! every use is assigned one of these; merging information from several
//! paths or uses always takes the least upper bound.

use serde::{Deserialize, Serialize};
use std::fmt;
use verso_ir::OverrideMode;

/// Access privilege required by a use or granted to a binding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipMode {
    /// Never accessed
    #[default]
    Unused,
    /// Shared, read-only access
    ImmutableBorrow,
    /// Exclusive, read-write access
    MutableBorrow,
    /// Consumed; terminal on its path
    Moved,
}

impl OwnershipMode {
    /// All modes from weakest to strongest.
    pub const ALL: [OwnershipMode; 4] = [
        OwnershipMode::Unused,
        OwnershipMode::ImmutableBorrow,
        OwnershipMode::MutableBorrow,
        OwnershipMode::Moved,
    ];

    /// Least upper bound.
    pub fn lub(self, other: OwnershipMode) -> OwnershipMode {
        self.max(other)
    }

    /// `self ⊑ other`
    pub fn within(self, other: OwnershipMode) -> bool {
        self <= other
    }

    /// Modes that exclude every concurrent access to the same binding.
    pub fn is_exclusive(self) -> bool {
        matches!(self, OwnershipMode::MutableBorrow | OwnershipMode::Moved)
    }

    pub fn is_borrow(self) -> bool {
        matches!(
            self,
            OwnershipMode::ImmutableBorrow | OwnershipMode::MutableBorrow
        )
    }

    /// The mode an explicit keyword pins a binding or use to.
    pub fn from_override(mode: OverrideMode) -> Option<OwnershipMode> {
        match mode {
            OverrideMode::None => None,
            OverrideMode::Move => Some(OwnershipMode::Moved),
            OverrideMode::Borrow => Some(OwnershipMode::ImmutableBorrow),
            OverrideMode::MutableBorrow | OverrideMode::Inout => Some(OwnershipMode::MutableBorrow),
        }
    }

    /// Keyword that requests this mode explicitly, for fix suggestions.
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            OwnershipMode::Unused => None,
            OwnershipMode::ImmutableBorrow => Some("borrow"),
            OwnershipMode::MutableBorrow => Some("mut"),
            OwnershipMode::Moved => Some("move"),
        }
    }
}

impl fmt::Display for OwnershipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OwnershipMode::Unused => "unused",
            OwnershipMode::ImmutableBorrow => "immutable borrow",
            OwnershipMode::MutableBorrow => "mutable borrow",
            OwnershipMode::Moved => "move",
        };
        f.write_str(text)
    }
}

/// Least upper bound of a sequence of modes; `Unused` when empty.
pub fn lub_all(modes: impl IntoIterator<Item = OwnershipMode>) -> OwnershipMode {
    modes
        .into_iter()
        .fold(OwnershipMode::Unused, OwnershipMode::lub)
}
