use std::collections::HashMap;
use std::sync::OnceLock;

use crate::compiler::eltwise_kernel::{EltwiseKernel, EltwiseKernelGenerator, KernelDesc};
use crate::dispatch::{Capabilities, IsaLevel};
use crate::types::{DataType, Direction, EltwiseResult};

/// Hashable selector of one routine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub isa: IsaLevel,
    pub data_type: DataType,
    pub direction: Direction,
}

impl KernelKey {
    pub fn of(desc: &KernelDesc) -> Self {
        KernelKey {
            isa: desc.isa,
            data_type: desc.data_type,
            direction: desc.direction,
        }
    }
}

/// Factory producing a compiled routine for a descriptor.
pub type KernelBuilder = fn(&KernelDesc, &Capabilities) -> EltwiseResult<EltwiseKernel>;

/// Kernel registry: builder function per (ISA, data type, direction).
pub struct KernelRegistry {
    entries: HashMap<KernelKey, KernelBuilder>,
}

impl KernelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        KernelRegistry {
            entries: HashMap::new(),
        }
    }

    /// Register a builder, replacing any previous one for `key`.
    pub fn register(&mut self, key: KernelKey, builder: KernelBuilder) {
        self.entries.insert(key, builder);
    }

    pub fn get(&self, key: &KernelKey) -> Option<KernelBuilder> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &KernelKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of registered builders.
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Look up and run the builder for `desc`. `None` if nothing is registered.
    pub fn build(
        &self,
        desc: &KernelDesc,
        caps: &Capabilities,
    ) -> Option<EltwiseResult<EltwiseKernel>> {
        self.get(&KernelKey::of(desc)).map(|b| b(desc, caps))
    }

    /// Create a registry with the uniform generator for every ISA, data type
    /// and direction.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        for isa in IsaLevel::ALL {
            for data_type in DataType::ALL {
                for direction in [Direction::Forward, Direction::Backward] {
                    reg.register(
                        KernelKey { isa, data_type, direction },
                        build_uniform,
                    );
                }
            }
        }
        reg
    }

    /// Process-wide default registry.
    pub fn global() -> &'static KernelRegistry {
        static REGISTRY: OnceLock<KernelRegistry> = OnceLock::new();
        REGISTRY.get_or_init(KernelRegistry::with_defaults)
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_uniform(desc: &KernelDesc, caps: &Capabilities) -> EltwiseResult<EltwiseKernel> {
    EltwiseKernelGenerator::new(*desc).generate(caps)
}
