#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
#[macro_use]
mod test_utils;

pub mod closure;
pub mod error;
mod klock;
pub mod mailbox;
pub mod port;
pub mod timer;
pub mod utils;
pub mod work;

pub use self::{
    closure::{Closure, ClosureEnv, EventClosure},
    error::*,
    mailbox::{EventRecord, EventRegistration, EventSemaphore, Mailbox, NotifyOutcome},
    port::*,
    timer::{TimerList, TimerNode},
    work::{ScheduleOutcome, WorkItem, WorkQueue},
};
