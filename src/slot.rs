//! Tagged slot words and chain link cells.
//!
//! A bucket is a single machine word. The low four bits are tag bits; the
//! remaining bits are a pointer to either an object (owned by the embedder
//! through its [`SetPolicy`](crate::SetPolicy)) or a [`LinkNode`] extending
//! the bucket's overflow chain. An all-zero address means the slot is empty.
//!
//! The tag bits always describe the word's *payload*: for a link word, the
//! TTL bit refers to the link's payload object, not to the rest of the
//! chain. Displacement bits appear only on bucket heads holding an inline
//! object; chain cells are never displaced.

use core::fmt;
use core::ptr;

const LINK_BIT: usize = 1;
const DISPLACED_BIT: usize = 1 << 1;
// Set: the entry sits one bucket to the left of its home.
const DIRECTION_BIT: usize = 1 << 2;
const TTL_BIT: usize = 1 << 3;
const TAG_MASK: usize = 0xF;

/// Minimum alignment of every pointer stored in a slot word; the low four
/// bits of the word carry tags.
pub const MIN_PTR_ALIGN: usize = TAG_MASK + 1;

/// One bucket slot: empty, an inline object, or the head of a chain.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotPtr(usize);

/// Overflow cell extending a bucket chain. The payload word always holds an
/// inline object; `next` continues the chain and is never empty while the
/// cell is linked.
#[repr(align(16))]
pub(crate) struct LinkNode {
    pub(crate) payload: SlotPtr,
    pub(crate) next: SlotPtr,
}

impl SlotPtr {
    pub(crate) const fn empty() -> Self {
        SlotPtr(0)
    }

    pub(crate) fn is_empty(self) -> bool {
        self.0 & !TAG_MASK == 0
    }

    pub(crate) fn is_link(self) -> bool {
        !self.is_empty() && self.0 & LINK_BIT != 0
    }

    pub(crate) fn is_object(self) -> bool {
        !self.is_empty() && self.0 & LINK_BIT == 0
    }

    /// Address bits without tags. For a link word this is the `LinkNode`
    /// itself, not its payload.
    pub(crate) fn raw(self) -> *mut u8 {
        (self.0 & !TAG_MASK) as *mut u8
    }

    /// The payload object: the pointer itself for an inline object, the
    /// link's payload for a chain head.
    ///
    /// # Safety
    /// For a link word the `LinkNode` must still be live.
    pub(crate) unsafe fn get_object(self) -> *mut u8 {
        if self.is_link() {
            (*self.as_link()).payload.raw()
        } else {
            self.raw()
        }
    }

    /// # Safety
    /// The word must be a link word and the node must still be live.
    pub(crate) unsafe fn as_link(self) -> *mut LinkNode {
        debug_assert!(self.is_link());
        self.raw() as *mut LinkNode
    }

    /// Location of the continuation word, or null for non-link words.
    ///
    /// # Safety
    /// For a link word the `LinkNode` must still be live.
    pub(crate) unsafe fn next(self) -> *mut SlotPtr {
        if self.is_link() {
            &mut (*self.as_link()).next as *mut SlotPtr
        } else {
            ptr::null_mut()
        }
    }

    /// Become an inline object with all tag bits cleared.
    pub(crate) fn set_object(&mut self, obj: *mut u8) {
        debug_assert!(!obj.is_null());
        debug_assert_eq!(obj as usize & TAG_MASK, 0, "object pointer under-aligned for tag bits");
        self.0 = obj as usize;
    }

    /// Become a link head with all tag bits cleared except the link bit.
    pub(crate) fn set_link(&mut self, link: *mut LinkNode) {
        debug_assert!(!link.is_null());
        debug_assert_eq!(link as usize & TAG_MASK, 0);
        self.0 = link as usize | LINK_BIT;
    }

    /// Rebuild a word from a collapsing link's payload. Tag bits are not
    /// carried over; the caller re-applies the TTL bit it holds for this
    /// payload.
    ///
    /// # Safety
    /// The link must still be live.
    pub(crate) unsafe fn from_link(link: *mut LinkNode) -> Self {
        debug_assert!((*link).payload.is_object());
        (*link).payload
    }

    pub(crate) fn has_ttl(self) -> bool {
        self.0 & TTL_BIT != 0
    }

    pub(crate) fn set_ttl(&mut self, on: bool) {
        if on {
            self.0 |= TTL_BIT;
        } else {
            self.0 &= !TTL_BIT;
        }
    }

    pub(crate) fn is_displaced(self) -> bool {
        self.0 & DISPLACED_BIT != 0
    }

    /// Marks the entry displaced by `dir` buckets from its home; `dir` must
    /// be -1 or +1.
    pub(crate) fn set_displaced(&mut self, dir: i32) {
        debug_assert!(dir == 1 || dir == -1);
        self.0 |= DISPLACED_BIT;
        if dir < 0 {
            self.0 |= DIRECTION_BIT;
        } else {
            self.0 &= !DIRECTION_BIT;
        }
    }

    pub(crate) fn clear_displaced(&mut self) {
        self.0 &= !(DISPLACED_BIT | DIRECTION_BIT);
    }

    /// Offset from the home bucket to the actual bucket; meaningful only
    /// while the displaced bit is set.
    pub(crate) fn displace_dir(self) -> i32 {
        debug_assert!(self.is_displaced());
        if self.0 & DIRECTION_BIT != 0 {
            -1
        } else {
            1
        }
    }

    pub(crate) fn reset(&mut self) {
        self.0 = 0;
    }
}

impl fmt::Debug for SlotPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = if self.is_empty() {
            "empty"
        } else if self.is_link() {
            "link"
        } else {
            "object"
        };
        f.debug_struct("SlotPtr")
            .field("variant", &variant)
            .field("addr", &self.raw())
            .field("ttl", &self.has_ttl())
            .field("displaced", &self.is_displaced())
            .finish()
    }
}
