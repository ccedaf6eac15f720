#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
use r3_defer::{Group, RunError, WorkQueue};
use spin::Mutex as SpinMutex;
use std::{
    cell::Cell,
    sync::atomic::{AtomicU32, Ordering},
    thread,
};

mod semaphore;

pub use self::semaphore::StdSemaphore;

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate r3_defer;

/// The number of groups. The valid range of group numbers is
/// `0..NUM_GROUPS`.
pub const NUM_GROUPS: usize = 32;

/// Implemented on a port type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: r3_defer::Port {
    fn port_state() -> &'static State;
}

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation of
/// the corresponding trait methods of `Port*`.
#[doc(hidden)]
pub struct State {
    /// The thread currently in the CPU Lock state.
    cpu_lock_owner: SpinMutex<Option<thread::ThreadId>>,
    tick_count: AtomicU32,
    /// The set of groups whose trigger is enabled.
    enabled_groups: AtomicU32,
    /// The set of groups whose trigger is pending.
    pended_groups: AtomicU32,
}

thread_local! {
    /// The group whose handler the current thread is executing.
    static CURRENT_GROUP: Cell<Option<Group>> = Cell::new(None);
}

#[inline]
fn group_bit(group: Group) -> u32 {
    1 << group
}

impl State {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            cpu_lock_owner: SpinMutex::new(None),
            tick_count: AtomicU32::new(0),
            enabled_groups: AtomicU32::new(u32::MAX),
            pended_groups: AtomicU32::new(0),
        }
    }

    pub unsafe fn enter_cpu_lock<Traits: PortInstance>(&self) {
        log::trace!("enter_cpu_lock");
        let this_thread = thread::current().id();

        loop {
            {
                let mut owner = self.cpu_lock_owner.lock();
                assert_ne!(*owner, Some(this_thread), "CPU Lock is already active");
                if owner.is_none() {
                    *owner = Some(this_thread);
                    return;
                }
            }

            // Another thread is in a critical section
            thread::yield_now();
        }
    }

    pub unsafe fn leave_cpu_lock<Traits: PortInstance>(&self) {
        log::trace!("leave_cpu_lock");
        let mut owner = self.cpu_lock_owner.lock();
        assert_eq!(*owner, Some(thread::current().id()));
        *owner = None;
    }

    pub fn is_cpu_lock_active<Traits: PortInstance>(&self) -> bool {
        *self.cpu_lock_owner.lock() == Some(thread::current().id())
    }

    pub fn tick_count<Traits: PortInstance>(&self) -> u32 {
        self.tick_count.load(Ordering::Relaxed)
    }

    pub fn current_group<Traits: PortInstance>(&self) -> Option<Group> {
        CURRENT_GROUP.with(|g| g.get())
    }

    pub fn pend_group<Traits: PortInstance>(&self, group: Group) {
        log::trace!("pend_group({group})");
        self.pended_groups
            .fetch_or(group_bit(group), Ordering::Relaxed);
    }

    pub fn enable_group<Traits: PortInstance>(&self, group: Group) {
        log::trace!("enable_group({group})");
        self.enabled_groups
            .fetch_or(group_bit(group), Ordering::Relaxed);
    }

    pub fn disable_group<Traits: PortInstance>(&self, group: Group) {
        log::trace!("disable_group({group})");
        self.enabled_groups
            .fetch_and(!group_bit(group), Ordering::Relaxed);
    }

    pub fn is_group_enabled<Traits: PortInstance>(&self, group: Group) -> bool {
        self.enabled_groups.load(Ordering::Relaxed) & group_bit(group) != 0
    }
}

/// Set the simulated tick count.
pub fn set_ticks<Traits: PortInstance>(tick_count: u32) {
    log::trace!("set_ticks({tick_count})");
    Traits::port_state()
        .tick_count
        .store(tick_count, Ordering::Relaxed);
}

/// Advance the simulated tick count by `delta`. Returns the new tick count.
pub fn advance_ticks<Traits: PortInstance>(delta: u32) -> u32 {
    log::trace!("advance_ticks({delta})");
    Traits::port_state()
        .tick_count
        .fetch_add(delta, Ordering::Relaxed)
        .wrapping_add(delta)
}

/// Get a flag indicating whether the trigger of `group` is pending.
pub fn is_group_pended<Traits: PortInstance>(group: Group) -> bool {
    Traits::port_state().pended_groups.load(Ordering::Relaxed) & group_bit(group) != 0
}

/// Take the pending triggers of enabled groups one by one, and call
/// [`WorkQueue::run`] for each of them in the calling thread, emulating the
/// delivery of software interrupts. The group with the smallest number is
/// taken first. Returns the number of `run` calls.
///
/// [`PortGroups::current_group`] reports the group being delivered while
/// `run` executes.
///
/// [`PortGroups::current_group`]: r3_defer::PortGroups::current_group
pub fn deliver_pended<Traits: PortInstance>(queue: &WorkQueue<Traits>) -> Result<usize, RunError> {
    let state = Traits::port_state();
    let mut num_runs = 0;

    loop {
        let ready = state.pended_groups.load(Ordering::Relaxed)
            & state.enabled_groups.load(Ordering::Relaxed);
        if ready == 0 {
            break;
        }

        let group = ready.trailing_zeros() as Group;
        state
            .pended_groups
            .fetch_and(!group_bit(group), Ordering::Relaxed);

        log::trace!("delivering group {group}");

        let outer_group = CURRENT_GROUP.with(|g| g.replace(Some(group)));
        let result = queue.run(group);
        CURRENT_GROUP.with(|g| g.set(outer_group));

        result?;
        num_runs += 1;
    }

    Ok(num_runs)
}

/// Initialize `env_logger`. Does nothing if a logger is already installed.
pub fn init_logger() {
    let _ = env_logger::try_init();
}

/// Define a port type implementing all port traits of `r3_defer` on the host
/// environment.
///
/// Each invocation gets its own CPU Lock, tick counter, and group flags, and
/// places its implementation in a module named `port_std_impl`, so it can be
/// used only once per module.
///
/// # Safety
///
/// The port type must not be used in a way that violates the invariants of
/// the port traits, e.g., by calling their methods directly.
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $Traits:ident) => {
        $vis struct $Traits;

        mod port_std_impl {
            use super::$Traits;
            use $crate::r3_defer::{Group, PortCpuLock, PortGroups, PortTimer};
            use $crate::{State, PortInstance};

            pub(super) static PORT_STATE: State = State::new();

            unsafe impl PortInstance for $Traits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            unsafe impl PortCpuLock for $Traits {
                type RestoreToken = ();

                unsafe fn enter_cpu_lock() {
                    unsafe { PORT_STATE.enter_cpu_lock::<Self>() }
                }

                unsafe fn leave_cpu_lock(_: ()) {
                    unsafe { PORT_STATE.leave_cpu_lock::<Self>() }
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active::<Self>()
                }
            }

            impl PortTimer for $Traits {
                fn tick_count() -> u32 {
                    PORT_STATE.tick_count::<Self>()
                }
            }

            impl PortGroups for $Traits {
                const NUM_GROUPS: usize = $crate::NUM_GROUPS;

                fn current_group() -> Option<Group> {
                    PORT_STATE.current_group::<Self>()
                }

                fn pend_group(group: Group) {
                    PORT_STATE.pend_group::<Self>(group)
                }

                fn enable_group(group: Group) {
                    PORT_STATE.enable_group::<Self>(group)
                }

                fn disable_group(group: Group) {
                    PORT_STATE.disable_group::<Self>(group)
                }

                fn is_group_enabled(group: Group) -> bool {
                    PORT_STATE.is_group_enabled::<Self>(group)
                }
            }
        }
    };
}
