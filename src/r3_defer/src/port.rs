//! The interface between this crate and its environment.
//!
//! A port implements these traits on a zero-sized *port type*. Every object in
//! this crate is parameterized by the port type (conventionally named
//! `Traits`), which means the port's services are resolved statically and no
//! object has to carry a reference to its environment.

/// An interrupt group number.
///
/// A group is a software-triggerable interrupt line (or a priority level
/// served by one) that deferred work items are dispatched from.
pub type Group = u8;

/// Implemented by a port. Provides CPU Lock, the critical section primitive
/// used to protect every data structure of this crate.
///
/// # Safety
///
/// While CPU Lock is active, no other context (including interrupt handlers
/// and, on a hosted port, other threads) may observe or mutate the objects
/// protected by CPU Lock. The implementation must guarantee that at most one
/// execution context can be in the CPU Lock state at any point of time.
pub unsafe trait PortCpuLock: Sized + Send + Sync + 'static {
    /// The value returned by [`enter_cpu_lock`] that must be passed back to
    /// [`leave_cpu_lock`] to restore the previous interrupt mask state.
    ///
    /// [`enter_cpu_lock`]: Self::enter_cpu_lock
    /// [`leave_cpu_lock`]: Self::leave_cpu_lock
    type RestoreToken: Copy;

    /// Enter the CPU Lock state and return a token describing the previous
    /// state.
    ///
    /// # Safety
    ///
    /// Only meant to be called by this crate.
    unsafe fn enter_cpu_lock() -> Self::RestoreToken;

    /// Restore the state saved by the matching call to
    /// [`enter_cpu_lock`](Self::enter_cpu_lock).
    ///
    /// # Safety
    ///
    /// Only meant to be called by this crate, with the token returned by the
    /// most recent unmatched call to `enter_cpu_lock`.
    unsafe fn leave_cpu_lock(token: Self::RestoreToken);

    /// Return a flag indicating whether the current context is in the CPU Lock
    /// state.
    fn is_cpu_lock_active() -> bool;
}

/// Implemented by a port. Provides the tick counter used by [`TimerList`].
///
/// [`TimerList`]: crate::TimerList
pub trait PortTimer: PortCpuLock {
    /// Read the current tick count.
    ///
    /// The counter is free-running and wraps around at `u32::MAX`. All timer
    /// calculations are done in wrapping arithmetic, so a timer's duration
    /// must be less than `1 << 31` ticks.
    fn tick_count() -> u32;
}

/// Implemented by a port. Provides the per-group trigger primitive used by
/// [`WorkQueue`].
///
/// [`WorkQueue`]: crate::WorkQueue
///
/// The group number passed to this trait's methods is always in range
/// `0..NUM_GROUPS`; [`WorkQueue`] rejects other values before calling them.
pub trait PortGroups: PortCpuLock {
    /// The number of groups. Valid group numbers are `0..NUM_GROUPS`.
    const NUM_GROUPS: usize;

    /// Get the group whose handler is currently running. Returns `None` in a
    /// task context.
    fn current_group() -> Option<Group>;

    /// Set the pending flag of the specified group's trigger. The port will
    /// call [`WorkQueue::run`] for the group when the trigger is taken.
    ///
    /// [`WorkQueue::run`]: crate::WorkQueue::run
    fn pend_group(group: Group);

    /// Allow the specified group's trigger to be taken.
    fn enable_group(group: Group);

    /// Withhold the specified group's trigger. The pending flag is preserved.
    fn disable_group(group: Group);

    /// Return a flag indicating whether the specified group's trigger is
    /// enabled.
    fn is_group_enabled(group: Group) -> bool;
}

/// Implemented by port types providing all services of this crate.
pub trait Port: PortTimer + PortGroups {}

impl<T: PortTimer + PortGroups> Port for T {}
