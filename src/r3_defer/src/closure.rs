//! Provides [`Closure`] and [`EventClosure`], light-weight closure types.
use core::fmt;

use crate::utils::Init;

/// The environment pointer of [`Closure`] and [`EventClosure`], laid out
/// like a nullable `const void *`.
///
/// A closure's function pointer and environment can be handed to C code as
/// they are, and a closure can be built in a constant context from a `'static`
/// reference.
#[derive(Copy, Clone)]
#[repr(transparent)]
pub struct ClosureEnv(Option<&'static ()>);

impl Default for ClosureEnv {
    #[inline]
    fn default() -> Self {
        Self::INIT
    }
}

impl Init for ClosureEnv {
    const INIT: Self = Self(None);
}

impl fmt::Debug for ClosureEnv {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClosureEnv")
    }
}

impl ClosureEnv {
    /// Point to `x`.
    #[inline]
    pub const fn from_ref<T: Sync + 'static>(x: &'static T) -> Self {
        // Safety: A reference to a zero-sized type is valid for any non-null,
        //         aligned address
        Self(Some(unsafe { &*(x as *const T as *const ()) }))
    }

    /// Get the pointer. [`ClosureEnv::INIT`] is a null pointer.
    #[inline]
    pub fn as_ptr(self) -> *const () {
        match self.0 {
            Some(x) => x,
            None => core::ptr::null(),
        }
    }
}

/// A callback without arguments, made of a C function pointer and its
/// environment. This is the callback type of [`WorkItem`] and [`TimerNode`].
///
/// [`WorkItem`]: crate::WorkItem
/// [`TimerNode`]: crate::TimerNode
#[derive(Debug, Copy, Clone)]
pub struct Closure {
    func: unsafe extern "C" fn(ClosureEnv),
    env: ClosureEnv,
}

impl Init for Closure {
    const INIT: Closure = unsafe { Closure::from_raw_parts(noop, ClosureEnv::INIT) };
}

impl Default for Closure {
    #[inline]
    fn default() -> Self {
        Self::INIT
    }
}

impl Closure {
    /// Construct a `Closure` that calls `func(env)`.
    ///
    /// # Safety
    ///
    /// Calling the constructed `Closure` is safe, so `func(env)` must be safe
    /// to call at any time from any context.
    #[inline]
    pub const unsafe fn from_raw_parts(
        func: unsafe extern "C" fn(ClosureEnv),
        env: ClosureEnv,
    ) -> Self {
        Self { func, env }
    }

    /// Construct a `Closure` that calls `func`.
    ///
    /// # Examples
    ///
    /// ```
    /// use r3_defer::Closure;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// static COUNT: AtomicUsize = AtomicUsize::new(0);
    /// fn bump() {
    ///     COUNT.fetch_add(1, Ordering::Relaxed);
    /// }
    ///
    /// static BUMP: fn() = bump;
    /// static C: Closure = Closure::from_ref(&BUMP);
    ///
    /// C.call();
    /// C.call();
    /// assert_eq!(COUNT.load(Ordering::Relaxed), 2);
    /// ```
    #[inline]
    pub const fn from_ref<T: Fn() + Sync + 'static>(func: &'static T) -> Self {
        // Safety: `trampoline_ref::<T>` expects a pointer to `T`
        unsafe { Self::from_raw_parts(trampoline_ref::<T>, ClosureEnv::from_ref(func)) }
    }

    /// Call the closure.
    #[inline]
    pub fn call(self) {
        // Safety: `self.env` is provided as the first parameter
        unsafe { (self.func)(self.env) }
    }

    /// Get the function pointer and the environment.
    #[inline]
    pub const fn as_raw_parts(self) -> (unsafe extern "C" fn(ClosureEnv), ClosureEnv) {
        (self.func, self.env)
    }
}

unsafe extern "C" fn noop(_: ClosureEnv) {}

unsafe extern "C" fn trampoline_ref<T: Fn()>(env: ClosureEnv) {
    // Safety: `from_ref` pairs this function with a `&'static T`
    let func: &T = unsafe { &*(env.as_ptr() as *const T) };
    func()
}

/// A light-weight closure receiving an event's mask and context value.
///
/// This is the handler type of [`EventRegistration`].
///
/// [`EventRegistration`]: crate::EventRegistration
#[derive(Debug, Copy, Clone)]
pub struct EventClosure {
    func: unsafe extern "C" fn(ClosureEnv, u32, usize),
    env: ClosureEnv,
}

impl EventClosure {
    /// Construct an `EventClosure` that calls `func(env, mask, context)`.
    ///
    /// # Safety
    ///
    /// See [`Closure::from_raw_parts`].
    #[inline]
    pub const unsafe fn from_raw_parts(
        func: unsafe extern "C" fn(ClosureEnv, u32, usize),
        env: ClosureEnv,
    ) -> Self {
        Self { func, env }
    }

    /// Construct an `EventClosure` that calls `func(mask, context)`.
    #[inline]
    pub const fn from_ref<T: Fn(u32, usize) + Sync + 'static>(func: &'static T) -> Self {
        // Safety: `event_trampoline_ref::<T>` expects a pointer to `T`
        unsafe { Self::from_raw_parts(event_trampoline_ref::<T>, ClosureEnv::from_ref(func)) }
    }

    /// Call the closure.
    #[inline]
    pub fn call(self, mask: u32, context: usize) {
        // Safety: `self.env` is provided as the first parameter
        unsafe { (self.func)(self.env, mask, context) }
    }

    /// Get the function pointer and the environment.
    #[inline]
    pub const fn as_raw_parts(self) -> (unsafe extern "C" fn(ClosureEnv, u32, usize), ClosureEnv) {
        (self.func, self.env)
    }
}

unsafe extern "C" fn event_trampoline_ref<T: Fn(u32, usize)>(
    env: ClosureEnv,
    mask: u32,
    context: usize,
) {
    // Safety: `from_ref` pairs this function with a `&'static T`
    let func: &T = unsafe { &*(env.as_ptr() as *const T) };
    func(mask, context)
}
