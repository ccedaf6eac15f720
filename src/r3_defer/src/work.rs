//! Work dispatcher
//!
//! A [`WorkItem`] is a callback bound to an interrupt group. Scheduling an
//! item either runs the callback right away (when the caller already executes
//! in the item's group) or links the item to a [`WorkQueue`] and pends the
//! group's trigger, whose handler then calls [`WorkQueue::run`].
//!
//! Requests made while an item is waiting in the queue are merged into the
//! outstanding one. The callback runs at least once after every request.
use core::fmt;

use crate::{
    closure::Closure,
    error::{BadContextError, BadParamError, GroupError, RunError, ScheduleError},
    klock::{lock_cpu, CpuLockCell, CpuLockToken, CpuLockTokenRefMut},
    port::{Group, Port},
    utils::{
        debug_expect_consistent,
        intrusive_list::{Link, ListAccessor, ListHead},
        Init,
    },
};

/// The result of a successful [`WorkQueue::schedule`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The item was already waiting in the queue. The request will be
    /// satisfied by the outstanding callback invocation.
    Merged,
    /// The callback was invoked inline and has returned.
    Inline,
    /// The item was linked to the queue and its group's trigger was pended.
    Queued,
}

/// A deferred callback bound to an interrupt group.
///
/// The item is *pending* while its request count differs from its
/// acknowledgement count.
pub struct WorkItem<Traits: 'static> {
    /// Links the item to [`WorkQueue::list`]. A linked item is not
    /// necessarily pending; serviced items stay linked until the next
    /// [`WorkQueue::schedule`] call unlinks them.
    link: CpuLockCell<Traits, Option<Link<Self>>>,
    request_count: CpuLockCell<Traits, u8>,
    ack_count: CpuLockCell<Traits, u8>,
    group: Group,
    callback: Closure,
}

impl<Traits: Port> WorkItem<Traits> {
    /// Construct a `WorkItem` that calls `callback` from the handler of
    /// `group`.
    pub const fn new(group: Group, callback: Closure) -> Self {
        Self {
            link: CpuLockCell::new(None),
            request_count: Init::INIT,
            ack_count: Init::INIT,
            group,
            callback,
        }
    }

    /// Get the group the item is bound to.
    #[inline]
    pub fn group(&self) -> Group {
        self.group
    }

    fn is_pending_locked(&self, lock: &CpuLockToken<Traits>) -> bool {
        self.request_count.get(lock) != self.ack_count.get(lock)
    }
}

impl<Traits: Port> fmt::Debug for WorkItem<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("self", &(self as *const _))
            .field("request_count", &self.request_count)
            .field("ack_count", &self.ack_count)
            .field("group", &self.group)
            .field("callback", &self.callback)
            .finish()
    }
}

/// The queue of work items waiting for their groups' handlers.
pub struct WorkQueue<Traits: 'static> {
    list: CpuLockCell<Traits, ListHead<WorkItem<Traits>>>,
}

impl<Traits: Port> Init for WorkQueue<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl<Traits: Port> fmt::Debug for WorkQueue<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("list", &self.list)
            .finish()
    }
}

macro_rules! list_accessor {
    ($head:expr, $key:expr) => {{
        ListAccessor::new($head, |item| &item.link, $key)
    }};
}

/// Reject a group number that the port doesn't have.
#[inline]
fn expect_valid_group<Traits: Port>(group: Group) -> Result<(), BadParamError> {
    if usize::from(group) < Traits::NUM_GROUPS {
        Ok(())
    } else {
        Err(BadParamError::BadParam)
    }
}

impl<Traits: Port> WorkQueue<Traits> {
    /// Construct an empty `WorkQueue`.
    pub const fn new() -> Self {
        Self {
            list: CpuLockCell::new(ListHead::new()),
        }
    }

    /// Request the execution of `item`'s callback.
    ///
    /// Unless `chain` is `true`, the callback is invoked inline if the
    /// calling context is the handler of `item`'s group and the group is
    /// enabled. Otherwise, the item is queued and its group's trigger is
    /// pended. If `item` is still waiting in the queue, this request is merged
    /// into the outstanding one.
    pub fn schedule(
        &self,
        item: &'static WorkItem<Traits>,
        chain: bool,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let group = item.group;
        expect_valid_group::<Traits>(group)?;

        let mut lock = lock_cpu::<Traits>()?;

        self.unlink_serviced(lock.borrow_mut());

        let chain =
            chain || Traits::current_group() != Some(group) || !Traits::is_group_enabled(group);

        if item.link.read(&*lock).is_some() {
            log::trace!("schedule({:p}): merged into the outstanding request", item);
            return Ok(ScheduleOutcome::Merged);
        }

        let request_count = item.request_count.get(&*lock).wrapping_add(1);
        item.request_count.replace(&mut *lock, request_count);

        if chain {
            debug_expect_consistent(
                list_accessor!(&self.list, lock.borrow_mut()).push_back(item),
            );
            Traits::pend_group(group);
            log::trace!("schedule({:p}): queued to group {}", item, group);
            Ok(ScheduleOutcome::Queued)
        } else {
            item.ack_count.replace(&mut *lock, request_count);
            drop(lock);

            log::trace!("schedule({:p}): running inline", item);
            item.callback.call();
            Ok(ScheduleOutcome::Inline)
        }
    }

    /// Unlink all items that are no longer pending.
    fn unlink_serviced(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) {
        let mut cursor = list_accessor!(&self.list, lock.borrow_mut()).front();

        while let Some(item) = cursor {
            cursor = debug_expect_consistent(
                list_accessor!(&self.list, lock.borrow_mut()).next(item),
            )
            .flatten();

            if !item.is_pending_locked(&*lock) {
                debug_expect_consistent(
                    list_accessor!(&self.list, lock.borrow_mut()).remove(item),
                );
            }
        }
    }

    /// Run the callback of the first pending item of `group`. Meant to be
    /// called by the handler of `group`'s trigger.
    ///
    /// At most one item is processed by each call. If another pending item
    /// of `group` remains, the group's trigger is pended again so that the
    /// handler is re-entered for it. Returns `true` if a callback was
    /// invoked.
    pub fn run(&self, group: Group) -> Result<bool, RunError> {
        expect_valid_group::<Traits>(group)?;

        let mut lock = lock_cpu::<Traits>()?;

        let mut found = None;
        let mut more_pending = false;
        let mut cursor = list_accessor!(&self.list, lock.borrow_mut()).front();

        while let Some(item) = cursor {
            if item.group == group && item.is_pending_locked(&*lock) {
                if found.is_some() {
                    more_pending = true;
                    break;
                }
                found = Some(item);
            }

            cursor = debug_expect_consistent(
                list_accessor!(&self.list, lock.borrow_mut()).next(item),
            )
            .flatten();
        }

        let Some(item) = found else {
            log::trace!("run({}): nothing to do", group);
            return Ok(false);
        };

        // Mark the item as serviced. It remains linked until the next call to
        // `schedule` unlinks it.
        let request_count = item.request_count.get(&*lock);
        item.ack_count.replace(&mut *lock, request_count);

        if more_pending {
            Traits::pend_group(group);
        }

        drop(lock);

        log::trace!("run({}): running {:p}", group, item);
        item.callback.call();
        Ok(true)
    }

    /// Get a flag indicating whether `item` has a request that has not been
    /// serviced yet.
    pub fn is_pending(&self, item: &WorkItem<Traits>) -> Result<bool, BadContextError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(item.is_pending_locked(&*lock))
    }

    /// Allow `group`'s trigger to be taken.
    pub fn enable(&self, group: Group) -> Result<(), GroupError> {
        expect_valid_group::<Traits>(group)?;
        Traits::enable_group(group);
        Ok(())
    }

    /// Withhold `group`'s trigger. Queued items remain queued and are run
    /// after the group is enabled again.
    pub fn disable(&self, group: Group) -> Result<(), GroupError> {
        expect_valid_group::<Traits>(group)?;
        Traits::disable_group(group);
        Ok(())
    }

    /// Get a flag indicating whether `group`'s trigger is enabled.
    pub fn is_enabled(&self, group: Group) -> Result<bool, GroupError> {
        expect_valid_group::<Traits>(group)?;
        Ok(Traits::is_group_enabled(group))
    }
}
