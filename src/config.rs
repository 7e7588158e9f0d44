//! Process-wide configuration read from the environment.
//!
//! | Variable | Effect |
//! |---|---|
//! | `ELTWISE_MAX_ISA` | Cap the detected ISA (e.g. `avx2`, `sve_256`) |
//! | `ELTWISE_NUM_THREADS` | Worker count used by `Engine::new()` |
//! | `ELTWISE_JIT_DUMP` | Log every generated routine at info level (`1`/`true`) |
//!
//! Invalid values are logged and ignored.

use std::sync::OnceLock;

use crate::dispatch::IsaLevel;

pub const ENV_MAX_ISA: &str = "ELTWISE_MAX_ISA";
pub const ENV_NUM_THREADS: &str = "ELTWISE_NUM_THREADS";
pub const ENV_JIT_DUMP: &str = "ELTWISE_JIT_DUMP";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EltwiseConfig {
    /// Highest ISA the dispatcher may use within its family.
    pub max_isa: Option<IsaLevel>,
    /// Worker count override; `None` means the rayon pool size.
    pub num_threads: Option<usize>,
    /// Dump generated routines to the log.
    pub jit_dump: bool,
}

static CONFIG: OnceLock<EltwiseConfig> = OnceLock::new();

impl EltwiseConfig {
    /// Global configuration (read once, cached for the process lifetime).
    pub fn global() -> &'static EltwiseConfig {
        CONFIG.get_or_init(EltwiseConfig::from_env)
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = EltwiseConfig::default();

        if let Some(raw) = lookup(ENV_MAX_ISA) {
            match IsaLevel::from_name(raw.trim()) {
                Some(isa) => cfg.max_isa = Some(isa),
                None => log::warn!("{ENV_MAX_ISA}={raw:?} is not a known ISA, ignoring"),
            }
        }

        if let Some(raw) = lookup(ENV_NUM_THREADS) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => cfg.num_threads = Some(n),
                _ => log::warn!("{ENV_NUM_THREADS}={raw:?} is not a positive integer, ignoring"),
            }
        }

        if let Some(raw) = lookup(ENV_JIT_DUMP) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => cfg.jit_dump = true,
                "0" | "false" | "no" | "off" | "" => cfg.jit_dump = false,
                _ => log::warn!("{ENV_JIT_DUMP}={raw:?} is not a boolean, ignoring"),
            }
        }

        cfg
    }
}
