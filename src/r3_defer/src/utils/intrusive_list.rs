//! Intrusive circular doubly linked lists of `'static` objects.
//!
//! Each element embeds its own [`Link`] in a cell, and a list is represented
//! by a [`ListHead`] pointing to its first element. Both are read and written
//! through [`CellLike`], so the same code can manipulate lists stored in plain
//! [`Cell`]s and lists whose cells can only be accessed with CPU Lock active.
use core::{cell::Cell, fmt, ptr};

use super::{debug_expect_consistent, Init};

/// The header of a circular list of `Element`s.
pub struct ListHead<Element: 'static> {
    pub first: Option<&'static Element>,
}

impl<Element: 'static> Clone for ListHead<Element> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Element: 'static> Copy for ListHead<Element> {}

impl<Element: 'static> Init for ListHead<Element> {
    const INIT: Self = Self { first: None };
}

impl<Element: 'static> fmt::Debug for ListHead<Element> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Print addresses only. Elements usually contain links back to this
        // list.
        write!(f, "ListHead({:?})", self.first.map(|x| x as *const Element))
    }
}

impl<Element: 'static> ListHead<Element> {
    pub const fn new() -> Self {
        Self::INIT
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

/// The neighbors of a linked element. An element linked to a list by itself
/// is its own neighbor.
pub struct Link<Element: 'static> {
    pub prev: &'static Element,
    pub next: &'static Element,
}

impl<Element: 'static> Clone for Link<Element> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Element: 'static> Copy for Link<Element> {}

impl<Element: 'static> fmt::Debug for Link<Element> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Link")
            .field("prev", &(self.prev as *const Element))
            .field("next", &(self.next as *const Element))
            .finish()
    }
}

/// A cell whose contents are copied in and out with the help of a key.
pub trait CellLike<Key> {
    type Target;

    fn get(&self, key: &Key) -> Self::Target;
    fn set(&self, key: &mut Key, value: Self::Target);
}

impl<T: Copy> CellLike<()> for Cell<T> {
    type Target = T;

    fn get(&self, _: &()) -> Self::Target {
        self.get()
    }
    fn set(&self, _: &mut (), value: Self::Target) {
        self.set(value);
    }
}

impl<Key, C: CellLike<Key>> CellLike<Key> for &C {
    type Target = C::Target;

    fn get(&self, key: &Key) -> Self::Target {
        (*self).get(key)
    }
    fn set(&self, key: &mut Key, value: Self::Target) {
        (*self).set(key, value);
    }
}

/// The error type of [`ListAccessor`]'s methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListError {
    /// The element is already linked to a list.
    AlreadyLinked,
    /// The element is not linked to any list.
    NotLinked,
    /// A linked element's neighbor is not linked.
    Inconsistent,
}

/// Provides operations on the list whose header is stored in `head`. The link
/// of each element is located by `map_link`. `key` is used to access the
/// cells.
pub struct ListAccessor<HeadCell, MapLink, Key> {
    head: HeadCell,
    map_link: MapLink,
    key: Key,
}

impl<Element, HeadCell, MapLink, LinkCell, Key> ListAccessor<HeadCell, MapLink, Key>
where
    Element: 'static,
    HeadCell: CellLike<Key, Target = ListHead<Element>>,
    MapLink: Fn(&'static Element) -> &'static LinkCell,
    LinkCell: CellLike<Key, Target = Option<Link<Element>>> + 'static,
{
    #[inline]
    pub fn new(head: HeadCell, map_link: MapLink, key: Key) -> Self {
        Self {
            head,
            map_link,
            key,
        }
    }

    #[inline]
    fn link(&self, item: &'static Element) -> Option<Link<Element>> {
        (self.map_link)(item).get(&self.key)
    }

    #[inline]
    fn set_link(&mut self, item: &'static Element, link: Option<Link<Element>>) {
        (self.map_link)(item).set(&mut self.key, link);
    }

    /// Rewrite the link of `item`, which must be linked.
    fn update_link(
        &mut self,
        item: &'static Element,
        f: impl FnOnce(&mut Link<Element>),
    ) -> Result<(), ListError> {
        let mut link = self.link(item).ok_or(ListError::Inconsistent)?;
        f(&mut link);
        self.set_link(item, Some(link));
        Ok(())
    }

    #[inline]
    fn set_first(&mut self, first: Option<&'static Element>) {
        self.head.set(&mut self.key, ListHead { first });
    }

    #[inline]
    fn is_first(&self, item: &'static Element) -> bool {
        self.front().map_or(false, |first| ptr::eq(first, item))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.get(&self.key).is_empty()
    }

    /// Get a flag indicating whether `item` is linked to *some* list that
    /// uses the same link field.
    #[inline]
    pub fn is_linked(&self, item: &'static Element) -> bool {
        self.link(item).is_some()
    }

    #[inline]
    pub fn front(&self) -> Option<&'static Element> {
        self.head.get(&self.key).first
    }

    /// Get the element following `item`. Returns `None` if `item` is the last
    /// element.
    pub fn next(&self, item: &'static Element) -> Result<Option<&'static Element>, ListError> {
        let next = self.link(item).ok_or(ListError::NotLinked)?.next;
        Ok(if self.is_first(next) { None } else { Some(next) })
    }

    /// Insert `item` before `at`, or at the back of the list if `at` is
    /// `None`.
    pub fn insert(
        &mut self,
        item: &'static Element,
        at: Option<&'static Element>,
    ) -> Result<(), ListError> {
        if self.is_linked(item) {
            return Err(ListError::AlreadyLinked);
        }

        let Some(first) = self.front() else {
            debug_assert!(at.is_none());
            self.set_link(item, Some(Link { prev: item, next: item }));
            self.set_first(Some(item));
            return Ok(());
        };

        let next = at.unwrap_or(first);
        let prev = self.link(next).ok_or(ListError::Inconsistent)?.prev;

        self.update_link(prev, |link| link.next = item)?;
        self.update_link(next, |link| link.prev = item)?;
        self.set_link(item, Some(Link { prev, next }));

        if at.map_or(false, |at| ptr::eq(at, first)) {
            self.set_first(Some(item));
        }

        Ok(())
    }

    #[inline]
    pub fn push_back(&mut self, item: &'static Element) -> Result<(), ListError> {
        self.insert(item, None)
    }

    /// Unlink `item` from the list.
    pub fn remove(&mut self, item: &'static Element) -> Result<(), ListError> {
        let Link { prev, next } = self.link(item).ok_or(ListError::NotLinked)?;

        if ptr::eq(next, item) {
            // `item` was the only element
            self.set_first(None);
        } else {
            self.update_link(prev, |link| link.next = next)?;
            self.update_link(next, |link| link.prev = prev)?;
            if self.is_first(item) {
                self.set_first(Some(next));
            }
        }

        self.set_link(item, None);
        Ok(())
    }

    /// Iterate over the elements from front to back. The iteration stops
    /// early if the list turns out to be inconsistent.
    pub fn iter(&self) -> impl Iterator<Item = &'static Element> + '_ {
        core::iter::successors(self.front(), move |&item| {
            debug_expect_consistent(self.next(item)).flatten()
        })
    }
}
