//! Single-threaded port and semaphore implementations for unit tests.
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{mailbox::EventSemaphore, utils::Init};

/// Define a port type with its own private state. Each test should define its
/// own port type so that tests running in parallel don't interfere with each
/// other.
///
/// The CPU Lock of the defined port is a plain flag. It does not exclude other
/// threads, so the objects of a port type must be used by a single thread.
macro_rules! test_port {
    ($vis:vis struct $Name:ident) => {
        #[derive(Debug)]
        $vis struct $Name;

        const _: () = {
            use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
            use $crate::port::{Group, PortCpuLock, PortGroups, PortTimer};

            static CPU_LOCK: AtomicBool = AtomicBool::new(false);
            static TICKS: AtomicU32 = AtomicU32::new(0);
            static ENABLED: AtomicU32 = AtomicU32::new(u32::MAX);
            static PENDED: AtomicU32 = AtomicU32::new(0);
            static CURRENT_GROUP: AtomicI32 = AtomicI32::new(-1);

            unsafe impl PortCpuLock for $Name {
                type RestoreToken = ();

                unsafe fn enter_cpu_lock() {
                    assert!(!CPU_LOCK.swap(true, Ordering::Relaxed));
                }

                unsafe fn leave_cpu_lock(_: ()) {
                    assert!(CPU_LOCK.swap(false, Ordering::Relaxed));
                }

                fn is_cpu_lock_active() -> bool {
                    CPU_LOCK.load(Ordering::Relaxed)
                }
            }

            impl PortTimer for $Name {
                fn tick_count() -> u32 {
                    TICKS.load(Ordering::Relaxed)
                }
            }

            impl PortGroups for $Name {
                const NUM_GROUPS: usize = 8;

                fn current_group() -> Option<Group> {
                    let g = CURRENT_GROUP.load(Ordering::Relaxed);
                    if g < 0 {
                        None
                    } else {
                        Some(g as Group)
                    }
                }

                fn pend_group(group: Group) {
                    log::trace!("pend_group({})", group);
                    PENDED.fetch_or(1 << group, Ordering::Relaxed);
                }

                fn enable_group(group: Group) {
                    ENABLED.fetch_or(1 << group, Ordering::Relaxed);
                }

                fn disable_group(group: Group) {
                    ENABLED.fetch_and(!(1 << group), Ordering::Relaxed);
                }

                fn is_group_enabled(group: Group) -> bool {
                    ENABLED.load(Ordering::Relaxed) & (1 << group) != 0
                }
            }

            #[allow(dead_code)]
            impl $Name {
                fn set_ticks(ticks: u32) {
                    TICKS.store(ticks, Ordering::Relaxed);
                }

                fn advance_ticks(delta: u32) {
                    TICKS.fetch_add(delta, Ordering::Relaxed);
                }

                /// Set the group reported by `current_group`.
                fn set_current_group(group: Option<Group>) {
                    CURRENT_GROUP.store(group.map_or(-1, i32::from), Ordering::Relaxed);
                }

                /// Clear and return the set of pended groups.
                fn take_pended() -> u32 {
                    PENDED.swap(0, Ordering::Relaxed)
                }

                fn pended() -> u32 {
                    PENDED.load(Ordering::Relaxed)
                }
            }
        };
    };
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Move `x` to the heap and leak it, producing a `'static` reference.
pub(crate) fn leak<T: 'static>(x: T) -> &'static T {
    Box::leak(Box::new(x))
}

/// Non-blocking counting semaphore. `take` fails immediately when the count
/// is zero.
#[derive(Debug)]
pub(crate) struct TestSemaphore {
    count: AtomicUsize,
}

impl Init for TestSemaphore {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        count: AtomicUsize::new(0),
    };
}

impl TestSemaphore {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl EventSemaphore for TestSemaphore {
    fn give(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn take(&self, _timeout: Option<u32>) -> bool {
        self.count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1))
            .is_ok()
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}
