//! CPU topology input and scheduler configuration.
//!
//! Platform topology discovery is an external collaborator (see the purpose
//! and scope of the crate): this module only specifies the shape of the
//! record the scheduler consumes, plus a conservative default detector so
//! the crate runs standalone.

/// The duty a pool's owning thread performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Main,
    CpuWorker,
    IoWorker,
}

/// A CPU topology snapshot used to size the pool.
#[derive(Debug, Clone, Copy)]
pub struct CpuInfo {
    pub numa_count: u32,
    pub physical_cores: u32,
    pub hardware_threads: u32,
    pub threads_per_core: u32,
    pub l1_cache_bytes: u32,
    pub l2_cache_bytes: u32,
    pub cache_line_bytes: u32,
    pub vendor: &'static str,
}

impl CpuInfo {
    /// Default CPU worker count: hardware threads minus one (the main
    /// thread keeps the remaining hardware thread).
    pub fn default_cpu_workers(&self) -> usize {
        self.hardware_threads.saturating_sub(1).max(1) as usize
    }

    /// Default I/O worker count: hardware threads divided by threads per
    /// core, i.e. roughly one I/O worker per physical core.
    pub fn default_io_workers(&self) -> usize {
        (self.hardware_threads / self.threads_per_core.max(1)).max(1) as usize
    }
}

/// Supplies a [`CpuInfo`] record. Real embedders provide a platform-specific
/// implementation (CPUID, `/sys/devices/system/cpu`, …); `detect` below is
/// a portable fallback built on `num_cpus` with conservative cache guesses.
pub trait CpuTopologyProvider {
    fn cpu_info(&self) -> CpuInfo;
}

/// The portable fallback topology provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectedTopology;

impl CpuTopologyProvider for DetectedTopology {
    fn cpu_info(&self) -> CpuInfo {
        let hardware_threads = num_cpus::get().max(1) as u32;
        let physical_cores = num_cpus::get_physical().max(1) as u32;
        let threads_per_core = (hardware_threads / physical_cores.max(1)).max(1);
        CpuInfo {
            numa_count: 1,
            physical_cores,
            hardware_threads,
            threads_per_core,
            l1_cache_bytes: 32 * 1024,
            l2_cache_bytes: 256 * 1024,
            cache_line_bytes: 64,
            vendor: "unknown",
        }
    }
}

/// Per-role pool sizing plus the topology used to derive defaults.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cpu_info: CpuInfo,
    pub cpu_workers: usize,
    pub io_workers: usize,
    pub main_pools: usize,
    /// Capacity of each pool's task slab; must be a power of two and
    /// satisfy the slot-index width (`< MAX_SLOTS_PER_POOL`).
    pub pool_capacity: u32,
    /// Capacity of each pool's ready deque and the global overflow queue;
    /// must be a power of two.
    pub ready_queue_capacity: u32,
    /// Number of permits records allocated per chunk.
    pub permits_chunk_size: u32,
}

impl SchedulerConfig {
    pub fn from_topology(provider: &dyn CpuTopologyProvider) -> Self {
        let cpu_info = provider.cpu_info();
        Self {
            cpu_workers: cpu_info.default_cpu_workers(),
            io_workers: cpu_info.default_io_workers(),
            main_pools: 1,
            pool_capacity: 4096,
            ready_queue_capacity: 4096,
            permits_chunk_size: 256,
            cpu_info,
        }
    }

    pub fn total_pools(&self) -> usize {
        self.main_pools + self.cpu_workers + self.io_workers
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::SchedulerError::ConfigInvalid;
        if self.main_pools == 0 {
            return Err(ConfigInvalid("main_pools must be >= 1"));
        }
        if !self.pool_capacity.is_power_of_two() {
            return Err(ConfigInvalid("pool_capacity must be a power of two"));
        }
        if self.pool_capacity >= crate::id::MAX_SLOTS_PER_POOL {
            return Err(ConfigInvalid("pool_capacity exceeds the slot-index width"));
        }
        if !self.ready_queue_capacity.is_power_of_two() {
            return Err(ConfigInvalid("ready_queue_capacity must be a power of two"));
        }
        if self.total_pools() > crate::id::MAX_POOLS as usize {
            return Err(ConfigInvalid("total pool count exceeds the pool-index width"));
        }
        if self.permits_chunk_size == 0 {
            return Err(ConfigInvalid("permits_chunk_size must be >= 1"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_topology(&DetectedTopology)
    }
}
