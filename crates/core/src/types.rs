//! Common types used throughout the workspace

use serde::{Deserialize, Serialize};

/// Represents a memory address (supports both 32 and 64 bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    pub const ZERO: Address = Address(0);

    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Offset the address, returning `None` on overflow or underflow.
    pub fn checked_offset(&self, offset: i64) -> Option<Self> {
        self.0.checked_add_signed(offset).map(Self)
    }

    /// Distance from `base` to this address, `None` if this address is below `base`.
    pub fn checked_sub(&self, base: Address) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Self(value as u64)
    }
}

/// CPU type as recorded in the Mach header `cputype` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuType {
    X86,
    X86_64,
    Arm,
    Arm64,
    Unknown(u32),
}

impl CpuType {
    const ABI64: u32 = 0x0100_0000;
    const I386: u32 = 7;
    const ARM: u32 = 12;

    pub fn from_raw(cputype: u32) -> Self {
        match cputype {
            Self::I386 => CpuType::X86,
            c if c == (Self::I386 | Self::ABI64) => CpuType::X86_64,
            Self::ARM => CpuType::Arm,
            c if c == (Self::ARM | Self::ABI64) => CpuType::Arm64,
            other => CpuType::Unknown(other),
        }
    }

    pub fn raw(&self) -> u32 {
        match self {
            CpuType::X86 => Self::I386,
            CpuType::X86_64 => Self::I386 | Self::ABI64,
            CpuType::Arm => Self::ARM,
            CpuType::Arm64 => Self::ARM | Self::ABI64,
            CpuType::Unknown(raw) => *raw,
        }
    }

    /// CPU type of the running process, if it is one Mach-O knows about.
    pub fn native() -> Option<Self> {
        if cfg!(target_arch = "x86_64") {
            Some(CpuType::X86_64)
        } else if cfg!(target_arch = "x86") {
            Some(CpuType::X86)
        } else if cfg!(target_arch = "aarch64") {
            Some(CpuType::Arm64)
        } else if cfg!(target_arch = "arm") {
            Some(CpuType::Arm)
        } else {
            None
        }
    }

    pub fn is_64bit(&self) -> bool {
        matches!(self, CpuType::X86_64 | CpuType::Arm64)
    }

    pub fn pointer_size(&self) -> usize {
        if self.is_64bit() {
            8
        } else {
            4
        }
    }
}

/// Platform an image was built for
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Unknown,
    MacOS,
    iOS,
    tvOS,
    watchOS,
    bridgeOS,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Unknown => write!(f, "unknown"),
            Platform::MacOS => write!(f, "macOS"),
            Platform::iOS => write!(f, "iOS"),
            Platform::tvOS => write!(f, "tvOS"),
            Platform::watchOS => write!(f, "watchOS"),
            Platform::bridgeOS => write!(f, "bridgeOS"),
        }
    }
}

/// Packed `xxxx.yy.zz` version as stored in version load commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PackedVersion(pub u32);

impl PackedVersion {
    pub fn major(&self) -> u32 {
        self.0 >> 16
    }

    pub fn minor(&self) -> u32 {
        (self.0 >> 8) & 0xFF
    }

    pub fn patch(&self) -> u32 {
        self.0 & 0xFF
    }
}

impl std::fmt::Display for PackedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}
