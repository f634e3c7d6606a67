//! Task storage: inline closures, slots, the per-pool slab/deque/permits
//! arena, and permits-list records.

pub mod closure;
pub(crate) mod permits;
pub(crate) mod pool;
pub(crate) mod slot;

pub use pool::TaskHandle;
pub use slot::{CompletionType, TaskContext};
