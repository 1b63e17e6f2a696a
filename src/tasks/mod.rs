//! Background Tasks Module
//!
//! Long-running loops spawned by the engine.
//!
//! # Tasks
//! - Poll timer: ticks the polling coordinator on its adaptive interval
//! - Memory check: runs pressure-aware eviction on a fixed interval

mod memory;
mod poll;

pub use memory::spawn_memory_task;
pub use poll::spawn_poll_task;
