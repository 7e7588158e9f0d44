//! Hardware capability snapshot for kernel generation.
//!
//! The host is probed once; the result, capped by `ELTWISE_MAX_ISA`, is
//! cached for the process lifetime and never mutated afterwards.

pub mod isa;

pub use isa::{Capabilities, IsaFamily, IsaLevel};

use std::sync::OnceLock;

use crate::config::EltwiseConfig;

static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();

/// Get the global capability snapshot (detected once, cached for process lifetime).
pub fn cpu_capabilities() -> &'static Capabilities {
    CAPABILITIES.get_or_init(|| {
        let detected = Capabilities::detect();
        let caps = match EltwiseConfig::global().max_isa {
            Some(max) => detected.capped(max),
            None => detected,
        };
        log::debug!(
            "cpu capabilities: [{}]",
            caps.levels().map(IsaLevel::name).collect::<Vec<_>>().join(", ")
        );
        caps
    })
}

/// Shorthand for `cpu_capabilities().mayiuse(isa)`.
#[inline]
pub fn mayiuse(isa: IsaLevel) -> bool {
    cpu_capabilities().mayiuse(isa)
}
