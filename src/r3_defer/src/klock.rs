//! CPU Lock state management
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::{
    error::BadContextError,
    port::PortCpuLock,
    utils::{intrusive_list::CellLike, Init},
};

pub(crate) struct CpuLockTag<Traits>(Traits);

/// Proof that CPU Lock is active. Required to access [`CpuLockCell`]s.
pub(crate) type CpuLockToken<Traits> = tokenlock::UnsyncSingletonToken<CpuLockTag<Traits>>;

/// Identifies [`CpuLockToken`] as the token accepted by [`CpuLockCell`].
pub(crate) type CpuLockKeyhole<Traits> = tokenlock::SingletonTokenId<CpuLockTag<Traits>>;

/// A cell only accessible with CPU Lock active, i.e., while holding the
/// [`CpuLockToken`] of a [`CpuLockGuard`] returned by [`lock_cpu`].
pub(crate) struct CpuLockCell<Traits, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<Traits>>);

// Safety: The contents can be accessed only through `CpuLockToken`, and
//         `PortCpuLock` guarantees that at most one context can be in the CPU
//         Lock state (and thus hold the token) at a time.
unsafe impl<Traits: PortCpuLock, T: ?Sized + Send> Sync for CpuLockCell<Traits, T> {}

impl<Traits, T> CpuLockCell<Traits, T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::new(), x))
    }
}

impl<Traits: PortCpuLock, T: ?Sized> CpuLockCell<Traits, T> {
    /// Format the contents with `f` under CPU Lock. Prints a placeholder if
    /// CPU Lock is already active.
    pub(crate) fn debug_fmt_with_ref<'a, F: 'a + Fn(&T, &mut fmt::Formatter) -> fmt::Result>(
        &'a self,
        f: F,
    ) -> impl fmt::Debug + 'a {
        struct DebugFmtWithRef<'a, Traits, T: ?Sized, F> {
            cell: &'a CpuLockCell<Traits, T>,
            f: F,
        }

        impl<Traits: PortCpuLock, T: ?Sized, F: Fn(&T, &mut fmt::Formatter) -> fmt::Result>
            fmt::Debug for DebugFmtWithRef<'_, Traits, T, F>
        {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if let Ok(lock) = lock_cpu::<Traits>() {
                    f.write_str("CpuLockCell(")?;
                    (self.f)(self.cell.0.read(&*lock), f)?;
                    f.write_str(")")
                } else {
                    f.write_str("CpuLockCell(< locked >)")
                }
            }
        }

        DebugFmtWithRef { cell: self, f }
    }
}

impl<Traits: PortCpuLock, T: fmt::Debug> fmt::Debug for CpuLockCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.debug_fmt_with_ref(|x, f| x.fmt(f)).fmt(f)
    }
}

impl<Traits, T: Init> Init for CpuLockCell<Traits, T> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new(T::INIT);
}

impl<Traits, T: ?Sized> ops::Deref for CpuLockCell<Traits, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<Traits>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a, Element: Clone, Traits: PortCpuLock> CellLike<CpuLockTokenRefMut<'a, Traits>>
    for CpuLockCell<Traits, Element>
{
    type Target = Element;

    fn get(&self, key: &CpuLockTokenRefMut<'a, Traits>) -> Self::Target {
        self.0.get(&**key)
    }
    fn set(&self, key: &mut CpuLockTokenRefMut<'a, Traits>, value: Self::Target) {
        self.0.replace(&mut **key, value);
    }
}

/// Attempt to enter a CPU Lock state and get an RAII guard.
/// Return `BadContext` if the current context is already in a CPU Lock state.
pub(crate) fn lock_cpu<Traits: PortCpuLock>() -> Result<CpuLockGuard<Traits>, BadContextError> {
    if Traits::is_cpu_lock_active() {
        // Entering CPU Lock again would mint a second `CpuLockToken`
        return Err(BadContextError::BadContext);
    }

    // Safety: `enter_cpu_lock` is only meant to be called by us
    let restore = unsafe { Traits::enter_cpu_lock() };

    Ok(CpuLockGuard {
        // Safety: We just entered a CPU Lock state, which we weren't in before.
        //         This means there are no other instances of `CpuLockToken`.
        token: unsafe { CpuLockToken::new_unchecked() },
        restore,
    })
}

/// Leaves CPU Lock with the saved restore token when dropped. Dereferences to
/// [`CpuLockToken`].
pub(crate) struct CpuLockGuard<Traits: PortCpuLock> {
    token: CpuLockToken<Traits>,
    restore: Traits::RestoreToken,
}

impl<Traits: PortCpuLock> CpuLockGuard<Traits> {
    /// Construct a [`CpuLockTokenRefMut`] by borrowing `self`.
    pub(crate) fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_, Traits> {
        self.token.borrow_mut()
    }
}

impl<Traits: PortCpuLock> Drop for CpuLockGuard<Traits> {
    fn drop(&mut self) {
        // Safety: CPU Lock is currently active, and `restore` is the token
        //         returned when we entered it
        unsafe {
            Traits::leave_cpu_lock(self.restore);
        }
    }
}

impl<Traits: PortCpuLock> ops::Deref for CpuLockGuard<Traits> {
    type Target = CpuLockToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: PortCpuLock> ops::DerefMut for CpuLockGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// A zero-sized mutable borrow of [`CpuLockGuard`], passed to helper
/// functions that run under CPU Lock.
///
/// Unlike `&mut CpuLockGuard`, it isn't reborrowed implicitly. Pass
/// `lock.borrow_mut()` to keep using `lock` after the call.
pub(crate) type CpuLockTokenRefMut<'a, Traits> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, CpuLockTag<Traits>>;
