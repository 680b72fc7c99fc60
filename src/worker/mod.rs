//! Bounded concurrent execution of per-nest work

pub mod pool;

pub use pool::for_each_concurrent;
