//! Common types used across the analysis crates.

use std::fmt;
use std::str;

use serde::{Deserialize, Serialize};

/// The command dialect spoken by the native debugger that opened the dump.
///
/// The dialect selects both the command program issued by the crash
/// pipeline and the parser applied to each command's output. There is no
/// runtime polymorphism between dialects; parsing is a set of pure
/// functions keyed on this value.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// LLDB with the SOS plugin loaded, used for ELF and Mach-O dumps.
    Lldb,
    /// WinDbg / cdb with the SOS extension, used for Windows dumps.
    WinDbg,
}

impl Dialect {
    /// Returns the lowercase name of this dialect.
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Lldb => "lldb",
            Dialect::WinDbg => "windbg",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error returned when parsing an unknown [`Arch`] name.
#[derive(Clone, Copy, Debug)]
pub struct UnknownArchError;

impl fmt::Display for UnknownArchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown architecture")
    }
}

impl std::error::Error for UnknownArchError {}

/// Processor architectures recognized in dump module lists and metadata.
///
/// The variant names serialize to the canonical report spelling (`x86`,
/// `x64`, `arm`, `arm64`).
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Arch {
    /// Any architecture that could not be determined from the dump.
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
    /// 32-bit x86.
    #[serde(rename = "x86")]
    X86,
    /// 64-bit x86, also spelled `x86_64` or `amd64` in module paths.
    #[serde(rename = "x64")]
    Amd64,
    /// 32-bit ARM.
    #[serde(rename = "arm")]
    Arm,
    /// 64-bit ARM, also spelled `aarch64`.
    #[serde(rename = "arm64")]
    Arm64,
}

impl Arch {
    /// Returns the native pointer size in bytes, if the architecture is known.
    pub fn pointer_size(self) -> Option<usize> {
        match self {
            Arch::Unknown => None,
            Arch::Amd64 | Arch::Arm64 => Some(8),
            Arch::X86 | Arch::Arm => Some(4),
        }
    }

    /// Returns the pointer width in bits, if the architecture is known.
    pub fn pointer_bits(self) -> Option<u32> {
        self.pointer_size().map(|size| size as u32 * 8)
    }

    /// Returns `true` for 64-bit architectures.
    pub fn is_64bit(self) -> bool {
        self.pointer_size() == Some(8)
    }

    /// Parses an architecture from a token found in a module path or
    /// triple, such as `aarch64` or `x86_64`.
    ///
    /// Returns [`Arch::Unknown`] when the token does not name a known
    /// architecture, so it can be used in a scanning loop.
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "x86" | "i386" | "i686" => Arch::X86,
            "x64" | "x86_64" | "amd64" => Arch::Amd64,
            "arm" | "armhf" | "armv7" | "armv7l" => Arch::Arm,
            "arm64" | "aarch64" | "arm64e" => Arch::Arm64,
            _ => Arch::Unknown,
        }
    }

    /// Returns the canonical report name of this architecture.
    pub fn name(self) -> &'static str {
        match self {
            Arch::Unknown => "unknown",
            Arch::X86 => "x86",
            Arch::Amd64 => "x64",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl str::FromStr for Arch {
    type Err = UnknownArchError;

    fn from_str(s: &str) -> Result<Self, UnknownArchError> {
        match Arch::from_token(s) {
            Arch::Unknown => Err(UnknownArchError),
            arch => Ok(arch),
        }
    }
}

/// Parses a hexadecimal address with or without a `0x` prefix.
pub fn parse_hex_addr(text: &str) -> Option<u64> {
    let digits = text
        .trim()
        .strip_prefix("0x")
        .or_else(|| text.trim().strip_prefix("0X"))
        .unwrap_or_else(|| text.trim());
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Formats an address as lowercase hex with a `0x` prefix, the canonical
/// spelling used throughout report JSON.
pub fn format_hex_addr(addr: u64) -> String {
    format!("{addr:#x}")
}
