//! Synchronization primitives shared by the worker-thread engines.
//!
//! A [`Waiter`] is the one-shot completion handle a caller blocks on while a
//! worker applies a synchronous command. The [`CommandQueue`] is the mutexed
//! FIFO those commands travel through, together with the condition variable
//! the worker parks on between ticks.

mod command;
mod waiter;

pub use command::CommandQueue;
pub use waiter::Waiter;
