//! Engine configuration.
//!
//! Loaded from the build settings by the embedding compiler; every field
//! has a default so partial settings files are accepted.

use serde::{Deserialize, Serialize};

use crate::mode::OwnershipMode;

/// How a binding captured across an await, yield or message send resolves
/// when the programmer wrote no override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionPolicy {
    /// Parameters (caller-owned storage whose frame may be gone on resume)
    /// are moved into the suspended computation; locals of the suspending
    /// function itself are mutably borrowed.
    #[default]
    MoveCallerOwned,
    /// Every captured binding is moved.
    AlwaysMove,
    /// Every captured binding is mutably borrowed.
    MutableBorrow,
}

/// Configuration for the ownership engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed-point iteration bound for recursive call cycles
    pub max_signature_iterations: usize,

    /// Analyze independent functions on worker threads
    pub parallel: bool,

    /// Worker thread count; 0 uses the rayon default
    pub worker_threads: usize,

    pub suspension_policy: SuspensionPolicy,

    /// Parameter mode assumed for extern functions without a declared keyword
    pub default_extern_mode: OwnershipMode,

    /// Whether the function-body region may bulk-free allocations
    pub implicit_function_region: bool,

    /// Region nesting depth beyond which a warning is emitted
    pub max_region_depth: usize,

    /// Emit optimization hints as warnings
    pub suggest_optimizations: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_signature_iterations: 16,
            parallel: true,
            worker_threads: 0,
            suspension_policy: SuspensionPolicy::default(),
            default_extern_mode: OwnershipMode::Moved,
            implicit_function_region: true,
            max_region_depth: 10,
            suggest_optimizations: true,
        }
    }
}

impl EngineConfig {
    /// Single-threaded configuration, convenient for deterministic tests.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    pub fn with_max_signature_iterations(mut self, iterations: usize) -> Self {
        self.max_signature_iterations = iterations;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_suspension_policy(mut self, policy: SuspensionPolicy) -> Self {
        self.suspension_policy = policy;
        self
    }

    pub fn with_default_extern_mode(mut self, mode: OwnershipMode) -> Self {
        self.default_extern_mode = mode;
        self
    }

    pub fn with_implicit_function_region(mut self, enabled: bool) -> Self {
        self.implicit_function_region = enabled;
        self
    }

    pub fn with_max_region_depth(mut self, depth: usize) -> Self {
        self.max_region_depth = depth;
        self
    }

    pub fn with_optimization_hints(mut self, enabled: bool) -> Self {
        self.suggest_optimizations = enabled;
        self
    }
}
