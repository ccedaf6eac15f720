//! Error types
//!
//! Every operation has its own error type, each a subset of [`ResultCode`].
//! Conditions that are part of normal operation, such as a work item request
//! being merged into an outstanding one or the mailbox discarding its oldest
//! event, are reported through outcome types ([`ScheduleOutcome`],
//! [`NotifyOutcome`]) rather than errors.
//!
//! [`ScheduleOutcome`]: crate::ScheduleOutcome
//! [`NotifyOutcome`]: crate::NotifyOutcome
use core::fmt;

/// All result codes (including success) that the operations of this crate
/// can produce.
///
/// The values are those of the R3 kernel API, so a code can be passed through
/// a C API unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i8)]
pub enum ResultCode {
    /// The operation was successful.
    Success = 0,
    /// A group number is out of range.
    BadParam = -17,
    /// The operation was attempted with CPU Lock already active.
    BadContext = -25,
    /// The target object is not in a state that allows the operation.
    BadObjectState = -41,
}

impl ResultCode {
    /// Get the variant name of the result code.
    ///
    /// # Examples
    ///
    /// ```
    /// use r3_defer::ResultCode;
    /// assert_eq!(ResultCode::BadObjectState.as_str(), "BadObjectState");
    /// ```
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::BadParam => "BadParam",
            Self::BadContext => "BadContext",
            Self::BadObjectState => "BadObjectState",
        }
    }

    /// Get a flag indicating whether the code represents a failure. Failure
    /// codes are negative.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Define an error type whose variants are a subset of [`ResultCode`]'s.
///
/// `enum A: B, C { ... }` makes `B` and `C` convertible into `A`. Their
/// variants must be present in `A`. Each error type also defines a
/// like-named macro that implements such a conversion.
macro_rules! define_error {
    (
        $( #[$meta:meta] )*
        pub enum $Name:ident $(: $($Sub:ident),+ )? {
            $(
                $( #[$vmeta:meta] )*
                $Variant:ident
            ),+ $(,)?
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for the numeric values.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        pub enum $Name {
            $(
                $( #[$vmeta] )*
                $Variant = ResultCode::$Variant as i8,
            )+
        }

        impl fmt::Debug for $Name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Debug::fmt(&ResultCode::from(*self), f)
            }
        }

        impl From<$Name> for ResultCode {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant, )+
                }
            }
        }

        impl From<Result<(), $Name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $Name>) -> Self {
                x.map_or_else(Self::from, |()| Self::Success)
            }
        }

        $($( $Sub!(into $Name); )+)?

        #[allow(unused_macros)]
        macro_rules! $Name {
            (into $Dest:ident) => {
                impl From<$Name> for $Dest {
                    #[inline]
                    fn from(x: $Name) -> Self {
                        match x {
                            $( $Name::$Variant => Self::$Variant, )+
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    /// CPU Lock is already active.
    pub enum BadContextError {
        BadContext,
    }
}

define_error! {
    /// A group number is out of range.
    pub enum BadParamError {
        BadParam,
    }
}

define_error! {
    /// A registration is already linked to a mailbox.
    pub enum BadObjectStateError {
        BadObjectState,
    }
}

define_error! {
    /// Error type for [`WorkQueue::schedule`].
    ///
    /// [`WorkQueue::schedule`]: crate::WorkQueue::schedule
    pub enum ScheduleError: BadContextError, BadParamError {
        /// CPU Lock is active.
        BadContext,
        /// The work item's group is not less than [`PortGroups::NUM_GROUPS`].
        ///
        /// [`PortGroups::NUM_GROUPS`]: crate::PortGroups::NUM_GROUPS
        BadParam,
    }
}

define_error! {
    /// Error type for [`WorkQueue::run`].
    ///
    /// [`WorkQueue::run`]: crate::WorkQueue::run
    pub enum RunError: BadContextError, BadParamError {
        /// CPU Lock is active.
        BadContext,
        /// The group number is not less than [`PortGroups::NUM_GROUPS`].
        ///
        /// [`PortGroups::NUM_GROUPS`]: crate::PortGroups::NUM_GROUPS
        BadParam,
    }
}

define_error! {
    /// Error type for [`WorkQueue::enable`], [`WorkQueue::disable`], and
    /// [`WorkQueue::is_enabled`].
    ///
    /// [`WorkQueue::enable`]: crate::WorkQueue::enable
    /// [`WorkQueue::disable`]: crate::WorkQueue::disable
    /// [`WorkQueue::is_enabled`]: crate::WorkQueue::is_enabled
    pub enum GroupError: BadParamError {
        /// The group number is not less than [`PortGroups::NUM_GROUPS`].
        ///
        /// [`PortGroups::NUM_GROUPS`]: crate::PortGroups::NUM_GROUPS
        BadParam,
    }
}

define_error! {
    /// Error type for the operations of [`TimerNode`] and [`TimerList`].
    ///
    /// [`TimerNode`]: crate::TimerNode
    /// [`TimerList`]: crate::TimerList
    pub enum TimerError: BadContextError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    /// Error type for [`Mailbox::notify`] and the dispatching operations of
    /// [`Mailbox`].
    ///
    /// [`Mailbox`]: crate::Mailbox
    /// [`Mailbox::notify`]: crate::Mailbox::notify
    pub enum MailboxError: BadContextError {
        /// CPU Lock is active, or a record is being dispatched to the
        /// handlers of the same mailbox.
        BadContext,
    }
}

define_error! {
    /// Error type for [`Mailbox::add_callback`] and
    /// [`Mailbox::remove_callback`].
    ///
    /// [`Mailbox::add_callback`]: crate::Mailbox::add_callback
    /// [`Mailbox::remove_callback`]: crate::Mailbox::remove_callback
    pub enum RegisterError: BadContextError, BadObjectStateError {
        /// CPU Lock is active.
        BadContext,
        /// The registration is already linked to a mailbox.
        BadObjectState,
    }
}
