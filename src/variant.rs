//! Stub-composition variants.
//!
//! Every produced intermediate module is tagged with whether stand-in
//! implementations were linked into it. Variants form a small lattice over
//! two bits: "contains unstubbed code" and "contains stubbed code". Merging
//! the inputs of a link step ORs the bits, so a library mixing both kinds
//! comes out as [`Variant::AnyStubs`]. "No artifact produced" is represented
//! by `Option::<Variant>::None` rather than a fourth state.

use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::ops::BitOr;

use crate::paths;

/// Suffix appended to artifacts built entirely from stand-ins.
pub const ALL_STUBS_SUFFIX: &str = "_stub";

/// Stub composition of one produced artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Variant {
    /// Built only from real project code.
    NoStubs = 0b01,
    /// Built only from stand-in implementations.
    AllStubs = 0b10,
    /// Built from a mixture of real and stand-in code.
    AnyStubs = 0b11,
}

impl Variant {
    /// The variant of a single input file.
    #[must_use]
    pub fn of_input(is_stub: bool) -> Self {
        if is_stub { Self::AllStubs } else { Self::NoStubs }
    }

    /// Whether any stand-in code was linked in.
    #[must_use]
    pub fn has_stubs(self) -> bool {
        self as u8 & Self::AllStubs as u8 != 0
    }

    /// Merge an optional accumulated variant with the next input's.
    #[must_use]
    pub fn merge(acc: Option<Self>, next: Self) -> Self {
        acc.map_or(next, |prev| prev | next)
    }

    /// The file-name suffix distinguishing this variant's artifact from the
    /// no-stubs one. `mixed_suffix` names the [`Variant::AnyStubs`] flavour;
    /// it is empty when a whole target is linked as one composition and
    /// carries the requested entry file's name otherwise.
    #[must_use]
    pub fn suffix(self, mixed_suffix: &str) -> &str {
        match self {
            Self::NoStubs => "",
            Self::AllStubs => ALL_STUBS_SUFFIX,
            Self::AnyStubs => mixed_suffix,
        }
    }

    /// Apply this variant's suffix to an artifact path. Idempotent for a
    /// given variant and suffix, so re-planning never stacks suffixes.
    #[must_use]
    pub fn apply_suffix(self, path: &Utf8Path, mixed_suffix: &str) -> Utf8PathBuf {
        let suffix = self.suffix(mixed_suffix);
        if suffix.is_empty() {
            return path.to_path_buf();
        }
        let already = path
            .file_stem()
            .is_some_and(|stem| stem.ends_with(suffix));
        if already {
            path.to_path_buf()
        } else {
            paths::add_suffix(path, suffix)
        }
    }
}

impl BitOr for Variant {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        match self as u8 | rhs as u8 {
            0b01 => Self::NoStubs,
            0b10 => Self::AllStubs,
            _ => Self::AnyStubs,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoStubs => "no-stubs",
            Self::AllStubs => "all-stubs",
            Self::AnyStubs => "any-stubs",
        };
        f.write_str(name)
    }
}
