//! Software timers
//!
//! A [`TimerList`] holds the running [`TimerNode`]s of one owner, sorted by
//! expiration time. The owner calls [`TimerList::handle_expired`] from its
//! tick handler to fire the timers whose expiration time has been reached.
//!
//! # Tick Arithmetic
//!
//! Expiration times are absolute tick counts of the free-running 32-bit
//! counter provided by [`PortTimer::tick_count`]. They are compared by the
//! sign of their wrapping difference, so a timer's duration and period must
//! be less than `1 << 31` ticks, and the owner must call `handle_expired`
//! at least once every `1 << 31` ticks.
use core::fmt;

use crate::{
    closure::Closure,
    error::TimerError,
    klock::{lock_cpu, CpuLockCell, CpuLockToken, CpuLockTokenRefMut},
    port::PortTimer,
    utils::{
        debug_expect_consistent,
        intrusive_list::{Link, ListAccessor, ListHead},
        Init,
    },
};

/// Get the signed number of ticks from `now` to `time`. A negative value means
/// `time` has already passed.
#[inline]
fn ticks_until(time: u32, now: u32) -> i32 {
    time.wrapping_sub(now) as i32
}

/// A one-shot or periodic software timer.
pub struct TimerNode<Traits: 'static> {
    /// Links the node to [`TimerList::list`] of `owner`.
    link: CpuLockCell<Traits, Option<Link<Self>>>,
    duration: CpuLockCell<Traits, u32>,
    /// The period of a periodic timer, or zero for a one-shot timer.
    period: CpuLockCell<Traits, u32>,
    /// The absolute tick count at which the timer expires. Valid only while
    /// the node is linked.
    expiry_time: CpuLockCell<Traits, u32>,
    /// The list the node was last started on.
    owner: CpuLockCell<Traits, Option<&'static TimerList<Traits>>>,
    callback: CpuLockCell<Traits, Closure>,
}

/// The list of running [`TimerNode`]s of one owner, sorted by expiration time.
/// Nodes with the same expiration time are kept in the order in which they
/// were inserted.
pub struct TimerList<Traits: 'static> {
    list: CpuLockCell<Traits, ListHead<TimerNode<Traits>>>,
}

macro_rules! list_accessor {
    ($head:expr, $key:expr) => {{
        ListAccessor::new($head, |node| &node.link, $key)
    }};
}

impl<Traits: PortTimer> TimerNode<Traits> {
    /// Construct an idle `TimerNode` that calls `callback` when it expires.
    pub const fn new(callback: Closure) -> Self {
        Self {
            link: CpuLockCell::new(None),
            duration: Init::INIT,
            period: Init::INIT,
            expiry_time: Init::INIT,
            owner: Init::INIT,
            callback: CpuLockCell::new(callback),
        }
    }

    /// Stop the timer if it's running, clear its settings, and replace the
    /// callback.
    pub fn init(&'static self, callback: Closure) -> Result<(), TimerError> {
        let mut lock = lock_cpu::<Traits>()?;
        self.detach(lock.borrow_mut());

        self.duration.replace(&mut *lock, 0);
        self.period.replace(&mut *lock, 0);
        self.expiry_time.replace(&mut *lock, 0);
        self.owner.replace(&mut *lock, None);
        self.callback.replace(&mut *lock, callback);
        Ok(())
    }

    /// Start the timer on `owner`. It expires `duration` ticks from now, and
    /// then every `period` ticks if `period` is non-zero.
    ///
    /// If the timer is already running (on any list), it's stopped first.
    pub fn start(
        &'static self,
        owner: &'static TimerList<Traits>,
        duration: u32,
        period: u32,
    ) -> Result<(), TimerError> {
        let mut lock = lock_cpu::<Traits>()?;
        self.detach(lock.borrow_mut());

        let expiry_time = Traits::tick_count().wrapping_add(duration);
        self.duration.replace(&mut *lock, duration);
        self.period.replace(&mut *lock, period);
        self.expiry_time.replace(&mut *lock, expiry_time);
        self.owner.replace(&mut *lock, Some(owner));

        owner.insert(lock.borrow_mut(), self);

        log::trace!(
            "start({:p}): duration = {}, period = {}, expiry_time = {}",
            self,
            duration,
            period,
            expiry_time
        );
        Ok(())
    }

    /// Stop the timer. Returns `true` if it was running.
    pub fn stop(&'static self) -> Result<bool, TimerError> {
        let mut lock = lock_cpu::<Traits>()?;
        Ok(self.detach(lock.borrow_mut()))
    }

    /// Unlink `self` from its owner. Returns `true` if it was linked.
    fn detach(&'static self, mut lock: CpuLockTokenRefMut<'_, Traits>) -> bool {
        if self.link.read(&*lock).is_none() {
            return false;
        }

        if let Some(owner) = self.owner.get(&*lock) {
            debug_expect_consistent(
                list_accessor!(&owner.list, lock.borrow_mut()).remove(self),
            );
        }

        log::trace!("stop({:p})", self);
        true
    }

    /// Get a flag indicating whether the timer is running.
    pub fn is_running(&self) -> Result<bool, TimerError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(self.is_running_locked(&*lock))
    }

    fn is_running_locked(&self, lock: &CpuLockToken<Traits>) -> bool {
        self.link.read(lock).is_some()
    }

    /// Get the absolute tick count at which the timer expires next. Returns
    /// `None` if the timer isn't running.
    pub fn expiry_time(&self) -> Result<Option<u32>, TimerError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(if self.is_running_locked(&*lock) {
            Some(self.expiry_time.get(&*lock))
        } else {
            None
        })
    }

    /// Get the number of ticks until the timer expires. Returns zero if the
    /// expiration time has passed but the owner hasn't processed it yet, and
    /// `None` if the timer isn't running.
    pub fn remaining(&self) -> Result<Option<u32>, TimerError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(if self.is_running_locked(&*lock) {
            let remaining = ticks_until(self.expiry_time.get(&*lock), Traits::tick_count());
            Some(remaining.max(0) as u32)
        } else {
            None
        })
    }

    /// Get the duration specified by the last call to [`Self::start`].
    pub fn duration(&self) -> Result<u32, TimerError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(self.duration.get(&*lock))
    }

    /// Get the period specified by the last call to [`Self::start`].
    pub fn period(&self) -> Result<u32, TimerError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(self.period.get(&*lock))
    }
}

impl<Traits: PortTimer> fmt::Debug for TimerNode<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerNode")
            .field("self", &(self as *const _))
            .field("duration", &self.duration)
            .field("period", &self.period)
            .field("expiry_time", &self.expiry_time)
            .field(
                "owner",
                &self.owner.debug_fmt_with_ref(|owner, f| {
                    fmt::Debug::fmt(&owner.map(|p| p as *const TimerList<Traits>), f)
                }),
            )
            .field("callback", &self.callback)
            .finish()
    }
}

impl<Traits: PortTimer> Init for TimerList<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl<Traits: PortTimer> fmt::Debug for TimerList<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerList")
            .field("list", &self.list)
            .finish()
    }
}

impl<Traits: PortTimer> TimerList<Traits> {
    /// Construct an empty `TimerList`.
    pub const fn new() -> Self {
        Self {
            list: CpuLockCell::new(ListHead::new()),
        }
    }

    /// Insert `node` before the first node expiring strictly later than it.
    fn insert(&self, mut lock: CpuLockTokenRefMut<'_, Traits>, node: &'static TimerNode<Traits>) {
        let expiry_time = node.expiry_time.get(&*lock);

        let mut cursor = list_accessor!(&self.list, lock.borrow_mut()).front();

        while let Some(other) = cursor {
            if ticks_until(other.expiry_time.get(&*lock), expiry_time) > 0 {
                break;
            }
            cursor = debug_expect_consistent(
                list_accessor!(&self.list, lock.borrow_mut()).next(other),
            )
            .flatten();
        }

        debug_expect_consistent(
            list_accessor!(&self.list, lock.borrow_mut()).insert(node, cursor),
        );
    }

    /// Fire the timers whose expiration time has been reached. Returns the
    /// number of callback invocations.
    ///
    /// The current tick count is sampled once. A periodic timer is restarted
    /// at its previous expiration time plus its period before its callback is
    /// called, so a timer that is behind by several periods fires several
    /// times. Callbacks are called without CPU Lock and may start or stop any
    /// timer, including the one being fired.
    pub fn handle_expired(&self) -> Result<usize, TimerError> {
        let mut lock = lock_cpu::<Traits>()?;
        let now = Traits::tick_count();
        let mut num_fired = 0;

        // For each iteration, check the first node (the earliest to expire).
        // Exit from the loop if the list is empty.
        loop {
            let first = list_accessor!(&self.list, lock.borrow_mut()).front();
            let Some(node) = first else { break };

            let expiry_time = node.expiry_time.get(&*lock);
            if ticks_until(expiry_time, now) > 0 {
                break;
            }

            // The timer has expired. Remove it from the list.
            debug_expect_consistent(
                list_accessor!(&self.list, lock.borrow_mut()).remove(node),
            );

            // Restart a periodic timer
            let period = node.period.get(&*lock);
            if period != 0 {
                node.expiry_time
                    .replace(&mut *lock, expiry_time.wrapping_add(period));
                self.insert(lock.borrow_mut(), node);
            }

            let callback = node.callback.get(&*lock);

            log::trace!("fire({:p}): expiry_time = {}, now = {}", node, expiry_time, now);

            // Call the callback function
            drop(lock);
            callback.call();
            num_fired += 1;
            lock = lock_cpu::<Traits>()?;
        }

        Ok(num_fired)
    }

    /// Get a flag indicating whether no timers are running on `self`.
    pub fn is_empty(&self) -> Result<bool, TimerError> {
        let mut lock = lock_cpu::<Traits>()?;
        let is_empty = list_accessor!(&self.list, lock.borrow_mut()).is_empty();
        Ok(is_empty)
    }

    /// Get the expiration time of the earliest timer. A tickless owner can use
    /// this to program its next alarm.
    pub fn next_expiry(&self) -> Result<Option<u32>, TimerError> {
        let mut lock = lock_cpu::<Traits>()?;
        let first = list_accessor!(&self.list, lock.borrow_mut()).front();
        Ok(first.map(|node| node.expiry_time.get(&*lock)))
    }
}
