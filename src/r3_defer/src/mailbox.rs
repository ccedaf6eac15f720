//! Event mailbox
//!
//! A [`Mailbox`] decouples the producers of events, which are usually
//! interrupt handlers, from a single dispatching context. Producers call
//! [`Mailbox::notify`] to append an [`EventRecord`] to a fixed-capacity ring
//! buffer and wake up the dispatching context through an [`EventSemaphore`].
//! The dispatching context removes records one by one and calls every
//! [`EventRegistration`] whose filter intersects the record's mask.
//!
//! When the ring buffer is full, the oldest record is discarded to make room
//! for the new one, and the mailbox's drop counter is incremented.
use core::{
    convert::Infallible,
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{
    closure::EventClosure,
    error::{BadObjectStateError, MailboxError, RegisterError},
    klock::{lock_cpu, CpuLockCell, CpuLockTokenRefMut},
    port::PortCpuLock,
    utils::{
        debug_expect_consistent,
        intrusive_list::{Link, ListAccessor, ListHead},
        Init,
    },
};

/// A counting semaphore used by [`Mailbox`] to wake up its dispatching context.
pub trait EventSemaphore: Send + Sync {
    /// Increment the count, waking up a waiter if any.
    ///
    /// This method may be called from an interrupt context, but never with CPU
    /// Lock active.
    fn give(&self);

    /// Wait until the count is non-zero and decrement it. Gives up after
    /// `timeout` ticks unless `timeout` is `None`. Returns `true` if the count
    /// was decremented.
    fn take(&self, timeout: Option<u32>) -> bool;

    /// Reset the count to zero.
    ///
    /// This method is called with CPU Lock active and must not block.
    fn reset(&self);
}

/// An event stored in [`Mailbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventRecord {
    /// The event bits. The record is delivered to the registrations whose
    /// filter has any of these bits set.
    pub mask: u32,
    /// An arbitrary value passed to the handlers along with `mask`.
    pub context: usize,
}

impl Init for EventRecord {
    const INIT: Self = Self {
        mask: 0,
        context: 0,
    };
}

/// The result of a successful [`Mailbox::notify`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// No registration is interested in the event. The event was discarded.
    Filtered,
    /// The event was stored.
    Queued,
    /// The event was stored, but the ring buffer was full, so the oldest
    /// record was discarded.
    Overflowed,
}

/// A handler registered to [`Mailbox`].
pub struct EventRegistration<Traits: 'static> {
    /// Links the registration to [`Mailbox::registrations`].
    link: CpuLockCell<Traits, Option<Link<Self>>>,
    /// The sequence number of the last record delivered to `handler`.
    last_seq: CpuLockCell<Traits, Option<u32>>,
    filter: u32,
    handler: EventClosure,
}

impl<Traits: PortCpuLock> EventRegistration<Traits> {
    /// Construct an `EventRegistration` that receives the records whose mask
    /// intersects `filter`.
    pub const fn new(filter: u32, handler: EventClosure) -> Self {
        Self {
            link: CpuLockCell::new(None),
            last_seq: Init::INIT,
            filter,
            handler,
        }
    }

    /// Get the filter mask.
    #[inline]
    pub fn filter(&self) -> u32 {
        self.filter
    }
}

impl<Traits: PortCpuLock> fmt::Debug for EventRegistration<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventRegistration")
            .field("self", &(self as *const _))
            .field("filter", &format_args!("{:#x}", self.filter))
            .field("handler", &self.handler)
            .finish()
    }
}

/// The ring buffer of [`Mailbox`].
///
/// `read` and `write` are free-running counters. `N` is a power of two, so
/// reducing them modulo `N` gives consistent slot indices even when they wrap
/// around.
struct Ring<const N: usize> {
    records: [EventRecord; N],
    read: u32,
    write: u32,
    drop_count: u32,
}

impl<const N: usize> Ring<N> {
    const INIT: Self = Self {
        records: [EventRecord::INIT; N],
        read: 0,
        write: 0,
        drop_count: 0,
    };

    #[inline]
    fn len(&self) -> usize {
        self.write.wrapping_sub(self.read) as usize
    }

    /// Append `record`, discarding the oldest record if the buffer is full.
    /// Returns `true` if a record was discarded.
    fn push(&mut self, record: EventRecord) -> bool {
        let overflowed = self.len() == N;
        if overflowed {
            self.read = self.read.wrapping_add(1);
            self.drop_count = self.drop_count.wrapping_add(1);
        }

        self.records[self.write as usize % N] = record;
        self.write = self.write.wrapping_add(1);
        overflowed
    }

    fn pop(&mut self) -> Option<EventRecord> {
        if self.read == self.write {
            None
        } else {
            let record = self.records[self.read as usize % N];
            self.read = self.read.wrapping_add(1);
            Some(record)
        }
    }
}

/// A bounded mailbox of [`EventRecord`]s with `N` slots.
///
/// `N` must be a power of two not greater than `1 << 31`.
pub struct Mailbox<Traits: 'static, Sem, const N: usize> {
    sem: Sem,
    ring: CpuLockCell<Traits, Ring<N>>,
    registrations: CpuLockCell<Traits, ListHead<EventRegistration<Traits>>>,
    /// The bitwise OR of the filters of all registrations. Read without CPU
    /// Lock by [`Mailbox::notify`].
    global_mask: AtomicU32,
    /// The sequence number of the record being dispatched.
    dispatch_seq: CpuLockCell<Traits, u32>,
    /// Set while [`Mailbox::dispatch_one`] is running.
    dispatching: CpuLockCell<Traits, bool>,
}

macro_rules! list_accessor {
    ($head:expr, $key:expr) => {{
        ListAccessor::new($head, |reg| &reg.link, $key)
    }};
}

impl<Traits: PortCpuLock, Sem: EventSemaphore, const N: usize> Mailbox<Traits, Sem, N> {
    const VALID_CAPACITY: () = assert!(
        N.is_power_of_two() && N <= 1 << 31,
        "the capacity must be a power of two not greater than `1 << 31`"
    );

    /// Construct an empty `Mailbox` that uses `sem` to wake up the
    /// dispatching context.
    pub const fn new(sem: Sem) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;

        Self {
            sem,
            ring: CpuLockCell::new(Ring::INIT),
            registrations: CpuLockCell::new(ListHead::new()),
            global_mask: AtomicU32::new(0),
            dispatch_seq: Init::INIT,
            dispatching: CpuLockCell::new(false),
        }
    }

    /// Get the semaphore.
    #[inline]
    pub fn semaphore(&self) -> &Sem {
        &self.sem
    }

    /// Get the number of slots.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Post an event.
    ///
    /// If no registration's filter intersects `mask`, the event is discarded
    /// without accessing the ring buffer or the semaphore. This method can be
    /// called from an interrupt context.
    pub fn notify(&self, mask: u32, context: usize) -> Result<NotifyOutcome, MailboxError> {
        if mask & self.global_mask.load(Ordering::Relaxed) == 0 {
            log::trace!("notify({:#x}, {}): filtered", mask, context);
            return Ok(NotifyOutcome::Filtered);
        }

        let mut lock = lock_cpu::<Traits>()?;
        let overflowed = self
            .ring
            .write(&mut *lock)
            .push(EventRecord { mask, context });
        drop(lock);

        let outcome = if overflowed {
            log::warn!(
                "notify({:#x}, {}): mailbox is full, the oldest event was dropped",
                mask,
                context
            );
            NotifyOutcome::Overflowed
        } else {
            log::trace!("notify({:#x}, {}): queued", mask, context);
            NotifyOutcome::Queued
        };

        self.sem.give();
        Ok(outcome)
    }

    /// Remove the oldest record.
    pub fn pop(&self) -> Result<Option<EventRecord>, MailboxError> {
        let mut lock = lock_cpu::<Traits>()?;
        Ok(self.ring.write(&mut *lock).pop())
    }

    /// Remove the oldest record. If there's none, reset the semaphore while
    /// CPU Lock is still active so that a record posted afterward is not
    /// missed.
    ///
    /// If records remain after the removal, the semaphore is given again.
    /// The semaphore may saturate below the number of stored records, so its
    /// count alone can't be trusted to account for every one of them.
    fn pop_or_reset(&self) -> Result<Option<EventRecord>, MailboxError> {
        let mut lock = lock_cpu::<Traits>()?;
        let ring = self.ring.write(&mut *lock);
        let record = ring.pop();
        let remaining = ring.len();
        if record.is_none() {
            self.sem.reset();
        }
        drop(lock);

        if remaining > 0 {
            self.sem.give();
        }
        Ok(record)
    }

    /// Call the handler of every registration whose filter intersects
    /// `record.mask`, in registration order.
    ///
    /// CPU Lock is released while a handler runs. Handlers may add or remove
    /// registrations (including their own). Each registration receives
    /// `record` at most once, and a registration added by a handler receives
    /// it too if it passes the filter.
    ///
    /// Handlers can't dispatch records of the same mailbox. Calling this
    /// method (or [`Self::wait_and_dispatch`]) from a handler fails with
    /// `BadContext`.
    pub fn dispatch_one(&self, record: EventRecord) -> Result<(), MailboxError> {
        let mut lock = lock_cpu::<Traits>()?;

        if self.dispatching.replace(&mut *lock, true) {
            return Err(MailboxError::BadContext);
        }

        let seq = self.dispatch_seq.get(&*lock).wrapping_add(1);
        self.dispatch_seq.replace(&mut *lock, seq);

        loop {
            let Some(reg) = self.next_receiver(lock.borrow_mut(), record.mask, seq) else {
                break;
            };

            reg.last_seq.replace(&mut *lock, Some(seq));
            let handler = reg.handler;

            drop(lock);
            log::trace!("dispatch({:?}) to {:p}", record, reg);
            handler.call(record.mask, record.context);
            lock = lock_cpu::<Traits>()?;
        }

        self.dispatching.replace(&mut *lock, false);
        Ok(())
    }

    /// Find the first registration that is interested in `mask` and hasn't
    /// received the record `seq` yet.
    fn next_receiver(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        mask: u32,
        seq: u32,
    ) -> Option<&'static EventRegistration<Traits>> {
        let mut cursor = list_accessor!(&self.registrations, lock.borrow_mut()).front();

        while let Some(reg) = cursor {
            if reg.filter & mask != 0 && reg.last_seq.get(&*lock) != Some(seq) {
                return Some(reg);
            }
            cursor = debug_expect_consistent(
                list_accessor!(&self.registrations, lock.borrow_mut()).next(reg),
            )
            .flatten();
        }

        None
    }

    /// Wait for a record for up to `timeout` ticks (or indefinitely if
    /// `timeout` is `None`) and dispatch it. Returns `true` if a record was
    /// dispatched.
    ///
    /// Spurious wake-ups caused by records discarded on overflow are absorbed
    /// by resetting the semaphore.
    pub fn wait_and_dispatch(&self, timeout: Option<u32>) -> Result<bool, MailboxError> {
        let lock = lock_cpu::<Traits>()?;
        if self.dispatching.get(&*lock) {
            // Don't consume a record that can't be dispatched
            return Err(MailboxError::BadContext);
        }
        drop(lock);

        if !self.sem.take(timeout) {
            return Ok(false);
        }

        match self.pop_or_reset()? {
            Some(record) => {
                self.dispatch_one(record)?;
                Ok(true)
            }
            None => {
                log::trace!("wait_and_dispatch: woken up, but the mailbox is empty");
                Ok(false)
            }
        }
    }

    /// Dispatch records forever. Only returns if called with CPU Lock active.
    pub fn dispatch_loop(&self) -> Result<Infallible, MailboxError> {
        loop {
            self.wait_and_dispatch(None)?;
        }
    }

    /// Register `reg`. Fails with `BadObjectState` if `reg` is already
    /// registered to a mailbox.
    pub fn add_callback(
        &self,
        reg: &'static EventRegistration<Traits>,
    ) -> Result<(), RegisterError> {
        let mut lock = lock_cpu::<Traits>()?;

        if reg.link.read(&*lock).is_some() {
            return Err(BadObjectStateError::BadObjectState.into());
        }

        debug_expect_consistent(
            list_accessor!(&self.registrations, lock.borrow_mut()).push_back(reg),
        );
        self.update_global_mask(lock.borrow_mut());

        log::trace!("add_callback({:p}): filter = {:#x}", reg, reg.filter);
        Ok(())
    }

    /// Unregister `reg`. Returns `false` if `reg` isn't registered to `self`.
    pub fn remove_callback(
        &self,
        reg: &'static EventRegistration<Traits>,
    ) -> Result<bool, RegisterError> {
        let mut lock = lock_cpu::<Traits>()?;

        if reg.link.read(&*lock).is_none() {
            return Ok(false);
        }

        // `reg` might be registered to another mailbox
        let is_ours = list_accessor!(&self.registrations, lock.borrow_mut())
            .iter()
            .any(|x| core::ptr::eq(x, reg));
        if !is_ours {
            return Ok(false);
        }

        debug_expect_consistent(
            list_accessor!(&self.registrations, lock.borrow_mut()).remove(reg),
        );
        self.update_global_mask(lock.borrow_mut());

        log::trace!("remove_callback({:p})", reg);
        Ok(true)
    }

    /// Recalculate `global_mask` from the registrations.
    fn update_global_mask(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) {
        let accessor = list_accessor!(&self.registrations, lock.borrow_mut());
        let mask = accessor.iter().fold(0, |mask, x| mask | x.filter);
        self.global_mask.store(mask, Ordering::Relaxed);
    }

    /// Get the bitwise OR of the filters of all registrations.
    #[inline]
    pub fn global_mask(&self) -> u32 {
        self.global_mask.load(Ordering::Relaxed)
    }

    /// Get the number of records discarded because of overflow.
    pub fn drop_count(&self) -> Result<u32, MailboxError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(self.ring.read(&*lock).drop_count)
    }

    /// Get the number of records waiting to be dispatched.
    pub fn len(&self) -> Result<usize, MailboxError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(self.ring.read(&*lock).len())
    }

    /// Get a flag indicating whether no records are waiting to be dispatched.
    pub fn is_empty(&self) -> Result<bool, MailboxError> {
        Ok(self.len()? == 0)
    }
}

impl<Traits: PortCpuLock, Sem: fmt::Debug, const N: usize> fmt::Debug for Mailbox<Traits, Sem, N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("sem", &self.sem)
            .field(
                "ring",
                &self.ring.debug_fmt_with_ref(|ring, f| {
                    f.debug_struct("Ring")
                        .field("read", &ring.read)
                        .field("write", &ring.write)
                        .field("drop_count", &ring.drop_count)
                        .finish()
                }),
            )
            .field("registrations", &self.registrations)
            .field(
                "global_mask",
                &format_args!("{:#x}", self.global_mask.load(Ordering::Relaxed)),
            )
            .finish()
    }
}
