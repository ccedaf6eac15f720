//! Utility
//!
//! **This module is exempt from the API stability guarantee** except for
//! [`Init`], which the objects of this crate implement.
mod init;
pub mod intrusive_list;
pub use self::init::*;

/// Check the result of a linked list operation that can only fail if the
/// caller's bookkeeping is broken.
///
/// Panics in a debug build. A release build assumes success and returns
/// `None` on failure.
#[inline]
#[track_caller]
pub(crate) fn debug_expect_consistent<T, E: core::fmt::Debug>(result: Result<T, E>) -> Option<T> {
    match result {
        Ok(x) => Some(x),
        Err(e) => {
            if cfg!(debug_assertions) {
                panic!("linked list is inconsistent: {e:?}");
            }
            None
        }
    }
}
