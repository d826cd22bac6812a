//! Memory resource for chain link cells.
//!
//! The set allocates one fixed-size cell per overflow entry. The resource
//! is supplied by the embedder, is owned by the set, and must outlive it;
//! every cell taken from it is handed back on delete, relocation, clear,
//! or drop.

use core::alloc::Layout;
use core::ptr::NonNull;

/// Allocation source for chain link cells.
pub trait MemoryResource {
    /// Allocates a block for `layout`. Exhaustion is the resource's
    /// business; the default resource aborts via the global error hook.
    fn allocate(&self, layout: Layout) -> NonNull<u8>;

    /// Returns a block to the resource.
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this same resource with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Default resource backed by the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalResource;

impl MemoryResource for GlobalResource {
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        debug_assert!(layout.size() > 0);
        let ptr = unsafe { std::alloc::alloc(layout) };
        match NonNull::new(ptr) {
            Some(p) => p,
            None => std::alloc::handle_alloc_error(layout),
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        std::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

impl<M: MemoryResource> MemoryResource for &M {
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }
}
