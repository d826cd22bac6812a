//! dense-set: an open-addressed, chained hash set with bounded displacement
//! and lazy TTL expiry.
//!
//! The set stores opaque object *pointers* and never reads object bodies.
//! Hashing, equality, sizing, expiry, and destruction come from a
//! [`SetPolicy`] supplied by the embedder; chain overflow cells are
//! allocated from a [`MemoryResource`] owned by the set. Each bucket is one
//! tagged machine word holding an inline object, a short overflow chain, or
//! an object displaced by one bucket from its home, and every traversal
//! opportunistically deletes expired entries it touches.
//!
//! Single-threaded by design: instances are `!Send + !Sync`, and lookups
//! take `&mut self` because any visit may reap expired entries in place.
//!
//! ```
//! use dense_set::{DenseSet, SetPolicy};
//! use std::ptr::NonNull;
//!
//! // 16-byte alignment keeps the low pointer bits free for the set's tags.
//! #[repr(align(16))]
//! struct Key {
//!     id: u64,
//! }
//!
//! struct Ids;
//!
//! impl SetPolicy for Ids {
//!     type Obj = Key;
//!     fn hash(&self, k: &Key, _cookie: u32) -> u64 {
//!         k.id.wrapping_mul(0x9e3779b97f4a7c15)
//!     }
//!     fn equal(&self, a: &Key, b: &Key, _cookie: u32) -> bool {
//!         a.id == b.id
//!     }
//!     fn alloc_size(&self, _k: &Key) -> usize {
//!         std::mem::size_of::<Key>()
//!     }
//!     fn expire_time(&self, _k: &Key) -> u32 {
//!         u32::MAX
//!     }
//!     fn destroy(&self, k: NonNull<Key>, _has_ttl: bool) {
//!         drop(unsafe { Box::from_raw(k.as_ptr()) });
//!     }
//! }
//!
//! let mut set = DenseSet::new(Ids);
//! let key = NonNull::from(Box::leak(Box::new(Key { id: 7 })));
//! set.insert(key, false).unwrap();
//! assert!(set.contains(&Key { id: 7 }, 0));
//! assert_eq!(set.len(), 1);
//! // Dropping the set destroys remaining objects through the policy.
//! ```

mod dense_set;
mod mem;
mod policy;
mod reentrancy;
mod slot;

pub use dense_set::{DenseSet, InsertError};
pub use mem::{GlobalResource, MemoryResource};
pub use policy::SetPolicy;
pub use slot::MIN_PTR_ALIGN;
