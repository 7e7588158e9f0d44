//! ISA levels and the read-only capability snapshot.
//!
//! The snapshot is taken once per process (see [`super::cpu_capabilities`]);
//! everything downstream treats it as a plain value.

use std::fmt;

/// A vector ISA tier. Determines vector length and register file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IsaLevel {
    Sse41,
    Avx2,
    Avx512Core,
    Asimd,
    /// Vector-length-agnostic SVE, executed at 128 bits.
    Sve128,
    Sve256,
    Sve512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsaFamily {
    X86,
    Arm,
}

impl IsaLevel {
    pub const ALL: [IsaLevel; 7] = [
        IsaLevel::Sse41,
        IsaLevel::Avx2,
        IsaLevel::Avx512Core,
        IsaLevel::Asimd,
        IsaLevel::Sve128,
        IsaLevel::Sve256,
        IsaLevel::Sve512,
    ];

    /// Vector register width in bytes.
    #[inline]
    pub fn vlen_bytes(self) -> usize {
        match self {
            IsaLevel::Sse41 | IsaLevel::Asimd | IsaLevel::Sve128 => 16,
            IsaLevel::Avx2 | IsaLevel::Sve256 => 32,
            IsaLevel::Avx512Core | IsaLevel::Sve512 => 64,
        }
    }

    /// Number of architectural vector registers.
    #[inline]
    pub fn num_vregs(self) -> usize {
        match self {
            IsaLevel::Sse41 | IsaLevel::Avx2 => 16,
            _ => 32,
        }
    }

    pub fn family(self) -> IsaFamily {
        match self {
            IsaLevel::Sse41 | IsaLevel::Avx2 | IsaLevel::Avx512Core => IsaFamily::X86,
            _ => IsaFamily::Arm,
        }
    }

    /// Position within the family, higher is wider.
    fn rank(self) -> u8 {
        match self {
            IsaLevel::Sse41 | IsaLevel::Asimd => 0,
            IsaLevel::Avx2 | IsaLevel::Sve128 => 1,
            IsaLevel::Avx512Core | IsaLevel::Sve256 => 2,
            IsaLevel::Sve512 => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IsaLevel::Sse41 => "sse41",
            IsaLevel::Avx2 => "avx2",
            IsaLevel::Avx512Core => "avx512_core",
            IsaLevel::Asimd => "asimd",
            IsaLevel::Sve128 => "sve_128",
            IsaLevel::Sve256 => "sve_256",
            IsaLevel::Sve512 => "sve_512",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sse41" | "sse4.1" | "sse4_1" => Some(IsaLevel::Sse41),
            "avx2" => Some(IsaLevel::Avx2),
            "avx512" | "avx512_core" => Some(IsaLevel::Avx512Core),
            "asimd" | "neon" => Some(IsaLevel::Asimd),
            "sve" | "sve_128" => Some(IsaLevel::Sve128),
            "sve_256" => Some(IsaLevel::Sve256),
            "sve_512" => Some(IsaLevel::Sve512),
            _ => None,
        }
    }

    #[inline]
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for IsaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable set of ISA levels usable on the running hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    mask: u32,
}

impl Capabilities {
    pub fn none() -> Self {
        Capabilities { mask: 0 }
    }

    pub fn from_levels(levels: &[IsaLevel]) -> Self {
        Capabilities {
            mask: levels.iter().fold(0, |m, l| m | l.bit()),
        }
    }

    /// Probe the host.
    pub fn detect() -> Self {
        Capabilities::from_levels(&detect_levels())
    }

    #[inline]
    pub fn mayiuse(&self, isa: IsaLevel) -> bool {
        self.mask & isa.bit() != 0
    }

    pub fn levels(&self) -> impl Iterator<Item = IsaLevel> + '_ {
        IsaLevel::ALL.into_iter().filter(move |l| self.mayiuse(*l))
    }

    /// Widest available level, preferring the higher-ranked one on ties.
    pub fn best(&self) -> Option<IsaLevel> {
        self.levels().max_by_key(|l| (l.vlen_bytes(), l.rank()))
    }

    /// Drop levels of `max`'s family that rank above it.
    pub fn capped(self, max: IsaLevel) -> Self {
        let mask = IsaLevel::ALL
            .into_iter()
            .filter(|l| self.mayiuse(*l))
            .filter(|l| l.family() != max.family() || l.rank() <= max.rank())
            .fold(0, |m, l| m | l.bit());
        Capabilities { mask }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detect_levels() -> Vec<IsaLevel> {
    let mut levels = Vec::new();
    if is_x86_feature_detected!("sse4.1") {
        levels.push(IsaLevel::Sse41);
    }
    if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
        levels.push(IsaLevel::Avx2);
    }
    if is_x86_feature_detected!("avx512f")
        && is_x86_feature_detected!("avx512bw")
        && is_x86_feature_detected!("avx512vl")
        && is_x86_feature_detected!("avx512dq")
    {
        levels.push(IsaLevel::Avx512Core);
    }
    levels
}

#[cfg(target_arch = "aarch64")]
fn detect_levels() -> Vec<IsaLevel> {
    let mut levels = vec![IsaLevel::Asimd];
    if std::arch::is_aarch64_feature_detected!("sve") {
        let vl = sve_vector_length_bytes().unwrap_or(16);
        levels.push(IsaLevel::Sve128);
        if vl >= 32 {
            levels.push(IsaLevel::Sve256);
        }
        if vl >= 64 {
            levels.push(IsaLevel::Sve512);
        }
    }
    levels
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_levels() -> Vec<IsaLevel> {
    Vec::new()
}

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
fn sve_vector_length_bytes() -> Option<usize> {
    const PR_SVE_GET_VL: libc::c_int = 51;
    const PR_SVE_VL_LEN_MASK: libc::c_int = 0xffff;
    // SAFETY: PR_SVE_GET_VL reads no pointer arguments.
    let ret = unsafe { libc::prctl(PR_SVE_GET_VL) };
    if ret < 0 {
        None
    } else {
        Some((ret & PR_SVE_VL_LEN_MASK) as usize)
    }
}

#[cfg(all(target_arch = "aarch64", not(target_os = "linux")))]
fn sve_vector_length_bytes() -> Option<usize> {
    None
}
