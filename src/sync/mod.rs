//! Lock-free queue primitives over 32-bit integer payloads, and the
//! event-count wake primitive built on top of a monitor.

pub mod deque;
pub mod eventcount;
pub mod mpmc;
pub mod spsc;

pub use deque::WorkStealingDeque;
pub use eventcount::EventCount;
pub use mpmc::MpmcRing;
pub use spsc::SpscRing;
