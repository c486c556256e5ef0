//! Error reporting for assembly and executable-memory operations.
//!
//! Every fallible operation in this crate (and in `anvil-jit`, which reuses
//! this type) returns a [`CodeResult`]. Each [`Error`] variant has a stable
//! numeric code and a stable short string so embedders can surface failures
//! through their own diagnostics without depending on Rust formatting.

use core::fmt;

/// A convenient alias for a `Result` that uses [`Error`] as the error type.
pub type CodeResult<T> = Result<T, Error>;

/// An error produced while assembling code or managing executable memory.
///
/// The discriminants are part of the public interface: they are never
/// renumbered, only appended to.
// This is manually implementing Error and Display instead of using thiserror
// to reduce the amount of dependencies used by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Error {
    // Configuration.
    /// The requested architecture is not supported by this build.
    InvalidArch = 1,
    /// An option value was out of range or inconsistent.
    InvalidOption = 2,
    /// The matched encoding requires a CPU feature absent from the emitter's
    /// feature mask.
    FeatureNotEnabled = 3,
    /// The operation is not valid in the current state, e.g. emitting into a
    /// holder that already recorded an error.
    InvalidState = 4,

    // Instructions.
    /// No encoding exists for the instruction with the given operands.
    InvalidInstruction = 10,
    /// An operand is malformed, e.g. a scale outside {1, 2, 4, 8}.
    InvalidOperand = 11,
    /// An operand's size does not fit any encoding, e.g. an immediate wider
    /// than the instruction accepts.
    InvalidOperandSize = 12,
    /// Operands that are individually valid cannot be combined, e.g. a
    /// high-byte register together with a register requiring a REX prefix.
    InvalidCombination = 13,
    /// A PC-relative displacement does not fit its encoded width.
    BranchTooFar = 14,
    /// A relocation could not be resolved during layout.
    RelocationFailed = 15,

    // Labels and sections.
    /// The label id does not belong to this code holder.
    InvalidLabel = 20,
    /// The label has already been bound to an offset.
    LabelAlreadyBound = 21,
    /// The section id does not belong to this code holder.
    InvalidSection = 22,
    /// Section placement produced overlapping virtual ranges.
    OverlappingSection = 23,

    // Memory.
    /// The operating system refused to provide memory.
    OutOfMemory = 30,
    /// An alignment request was not a power of two or exceeded the supported
    /// maximum.
    BadAlignment = 31,
    /// Executable memory could not be mapped, e.g. dual mapping is
    /// unavailable on this host.
    ExecutableMemoryFailed = 32,
    /// A page-protection change failed.
    ProtectionFailed = 33,
    /// An argument failed validation, e.g. a zero-size allocation or a
    /// pointer the allocator does not own.
    InvalidArgument = 34,
}

impl Error {
    /// Return the stable numeric code for this error.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Return the stable short name for this error.
    pub fn name(self) -> &'static str {
        match self {
            Error::InvalidArch => "InvalidArch",
            Error::InvalidOption => "InvalidOption",
            Error::FeatureNotEnabled => "FeatureNotEnabled",
            Error::InvalidState => "InvalidState",
            Error::InvalidInstruction => "InvalidInstruction",
            Error::InvalidOperand => "InvalidOperand",
            Error::InvalidOperandSize => "InvalidOperandSize",
            Error::InvalidCombination => "InvalidCombination",
            Error::BranchTooFar => "BranchTooFar",
            Error::RelocationFailed => "RelocationFailed",
            Error::InvalidLabel => "InvalidLabel",
            Error::LabelAlreadyBound => "LabelAlreadyBound",
            Error::InvalidSection => "InvalidSection",
            Error::OverlappingSection => "OverlappingSection",
            Error::OutOfMemory => "OutOfMemory",
            Error::BadAlignment => "BadAlignment",
            Error::ExecutableMemoryFailed => "ExecutableMemoryFailed",
            Error::ProtectionFailed => "ProtectionFailed",
            Error::InvalidArgument => "InvalidArgument",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (code {})", self.name(), self.code())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::InvalidArch.code(), 1);
        assert_eq!(Error::InvalidInstruction.code(), 10);
        assert_eq!(Error::InvalidLabel.code(), 20);
        assert_eq!(Error::OutOfMemory.code(), 30);
        assert_eq!(Error::InvalidArgument.code(), 34);
    }

    #[test]
    fn display_includes_name_and_code() {
        assert_eq!(Error::BranchTooFar.to_string(), "BranchTooFar (code 14)");
    }
}
