//! Target-architecture descriptors and CPU features.

use crate::error::{CodeResult, Error};
use core::fmt;

/// An architecture family a code holder can be initialized for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    /// 64-bit x86 (AMD64 / Intel 64).
    X64,
    /// 32-bit x86.
    X86,
    /// 64-bit ARM. Known to the descriptor but not encodable by this crate.
    Aarch64,
    /// 32-bit ARM. Known to the descriptor but not encodable by this crate.
    Arm,
}

impl Arch {
    /// Whether this crate can encode instructions for the architecture.
    pub fn is_supported(self) -> bool {
        matches!(self, Arch::X64 | Arch::X86)
    }

    /// Size of a pointer in bytes.
    pub fn pointer_bytes(self) -> u32 {
        match self {
            Arch::X64 | Arch::Aarch64 => 8,
            Arch::X86 | Arch::Arm => 4,
        }
    }

    /// Natural stack alignment in bytes at a call boundary.
    pub fn stack_alignment(self) -> u32 {
        match self {
            Arch::X64 | Arch::Aarch64 => 16,
            Arch::X86 => 4,
            Arch::Arm => 8,
        }
    }

    /// Byte order of the architecture. Every supported family is
    /// little-endian.
    pub fn is_little_endian(self) -> bool {
        true
    }

    /// Number of addressable general-purpose registers.
    pub fn gp_count(self) -> u32 {
        match self {
            Arch::X64 => 16,
            Arch::X86 => 8,
            Arch::Aarch64 => 32,
            Arch::Arm => 16,
        }
    }

    /// Number of addressable vector registers.
    pub fn vec_count(self) -> u32 {
        match self {
            Arch::X64 => 32,
            Arch::X86 => 8,
            Arch::Aarch64 => 32,
            Arch::Arm => 32,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Arch::X64 => "x86_64",
            Arch::X86 => "i686",
            Arch::Aarch64 => "aarch64",
            Arch::Arm => "arm",
        };
        f.write_str(s)
    }
}

/// A CPU feature consulted by the encoder.
///
/// The list follows the __CPUID Feature Flags__ column of the instruction
/// tables in the x64 reference manual; only features the instruction table
/// actually references are enumerated. The discriminant doubles as the bit
/// position in [`CpuFeatures`] and is stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Feature {
    Baseline = 0,
    Sse = 1,
    Sse2 = 2,
    Sse3 = 3,
    Ssse3 = 4,
    Sse41 = 5,
    Sse42 = 6,
    Avx = 7,
    Avx2 = 8,
    Avx512f = 9,
    Avx512vl = 10,
    Bmi1 = 11,
    Lzcnt = 12,
    Popcnt = 13,
}

/// A set of CPU features, used as the emitter's feature mask.
///
/// The library never queries the host behind the caller's back: masks are
/// constructed explicitly, so test suites can inject synthetic feature sets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuFeatures(u64);

impl CpuFeatures {
    /// An empty feature set. Note that even [`Feature::Baseline`] is absent,
    /// so every instruction is rejected; useful for testing.
    pub fn none() -> Self {
        CpuFeatures(0)
    }

    /// A feature set with every known feature enabled.
    pub fn all() -> Self {
        CpuFeatures(!0)
    }

    /// Detect the features of the host CPU. The detection runs once per
    /// process and is cached.
    ///
    /// On non-x86 hosts this returns the baseline-only set.
    pub fn host() -> Self {
        static HOST: std::sync::OnceLock<CpuFeatures> = std::sync::OnceLock::new();
        *HOST.get_or_init(Self::detect_host)
    }

    fn detect_host() -> Self {
        let mut features = CpuFeatures::none();
        features.insert(Feature::Baseline);
        #[cfg(target_arch = "x86_64")]
        {
            macro_rules! detect {
                ($($name:tt => $feature:ident),+ $(,)?) => {
                    $(
                        if std::arch::is_x86_feature_detected!($name) {
                            features.insert(Feature::$feature);
                        }
                    )+
                };
            }
            detect! {
                "sse" => Sse,
                "sse2" => Sse2,
                "sse3" => Sse3,
                "ssse3" => Ssse3,
                "sse4.1" => Sse41,
                "sse4.2" => Sse42,
                "avx" => Avx,
                "avx2" => Avx2,
                "avx512f" => Avx512f,
                "avx512vl" => Avx512vl,
                "bmi1" => Bmi1,
                "lzcnt" => Lzcnt,
                "popcnt" => Popcnt,
            }
        }
        features
    }

    /// Add a feature to the set.
    pub fn insert(&mut self, feature: Feature) -> &mut Self {
        self.0 |= 1 << feature as u8;
        self
    }

    /// Remove a feature from the set.
    pub fn remove(&mut self, feature: Feature) -> &mut Self {
        self.0 &= !(1 << feature as u8);
        self
    }

    /// Whether the set contains `feature`.
    pub fn contains(self, feature: Feature) -> bool {
        self.0 & (1 << feature as u8) != 0
    }
}

/// The full architecture descriptor consumed by emitters.
#[derive(Clone, Copy, Debug)]
pub struct ArchInfo {
    arch: Arch,
    features: CpuFeatures,
}

impl ArchInfo {
    /// Build a descriptor for `arch`, failing for architectures this crate
    /// cannot encode.
    pub fn new(arch: Arch) -> CodeResult<Self> {
        if !arch.is_supported() {
            return Err(Error::InvalidArch);
        }
        Ok(ArchInfo {
            arch,
            features: CpuFeatures::all(),
        })
    }

    /// The architecture family.
    pub fn arch(self) -> Arch {
        self.arch
    }

    /// The feature mask emitters consult before encoding.
    pub fn features(self) -> CpuFeatures {
        self.features
    }

    /// Replace the feature mask, e.g. with [`CpuFeatures::host`] or a
    /// synthetic set under test.
    pub fn set_features(&mut self, features: CpuFeatures) {
        self.features = features;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_arch_is_rejected() {
        assert_eq!(ArchInfo::new(Arch::Aarch64).unwrap_err(), Error::InvalidArch);
        assert!(ArchInfo::new(Arch::X64).is_ok());
    }

    #[test]
    fn feature_mask_round_trips() {
        let mut set = CpuFeatures::none();
        assert!(!set.contains(Feature::Avx));
        set.insert(Feature::Avx).insert(Feature::Sse2);
        assert!(set.contains(Feature::Avx));
        assert!(set.contains(Feature::Sse2));
        set.remove(Feature::Avx);
        assert!(!set.contains(Feature::Avx));
    }
}
