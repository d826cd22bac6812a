//! Shared test embedder: aligned heap objects with scriptable hashes, a
//! destroy-counting policy, and a link-counting memory resource.
#![allow(dead_code)]

use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

use dense_set::{DenseSet, GlobalResource, MemoryResource, SetPolicy};

pub const NO_EXPIRY: u32 = u32::MAX;

/// Test object. 16-byte alignment keeps the low pointer bits free for the
/// set's tag bits.
#[repr(align(16))]
pub struct TestObj {
    pub hash: u64,
    pub tag: u64,
    pub expire_at: u32,
    pub weight: usize,
}

#[derive(Clone, Default)]
pub struct Counters {
    pub destroyed: Rc<Cell<usize>>,
    pub last_cookie: Rc<Cell<u32>>,
}

pub struct TestPolicy {
    pub counters: Counters,
}

impl SetPolicy for TestPolicy {
    type Obj = TestObj;

    fn hash(&self, obj: &TestObj, cookie: u32) -> u64 {
        self.counters.last_cookie.set(cookie);
        obj.hash
    }

    fn equal(&self, a: &TestObj, b: &TestObj, cookie: u32) -> bool {
        self.counters.last_cookie.set(cookie);
        a.tag == b.tag
    }

    fn alloc_size(&self, obj: &TestObj) -> usize {
        obj.weight
    }

    fn expire_time(&self, obj: &TestObj) -> u32 {
        obj.expire_at
    }

    fn destroy(&self, obj: NonNull<TestObj>, _has_ttl: bool) {
        self.counters.destroyed.set(self.counters.destroyed.get() + 1);
        drop(unsafe { Box::from_raw(obj.as_ptr()) });
    }
}

pub fn new_set() -> (DenseSet<TestPolicy>, Counters) {
    let counters = Counters::default();
    let set = DenseSet::new(TestPolicy {
        counters: counters.clone(),
    });
    (set, counters)
}

/// Hash whose top `log` bits select `home`.
pub fn home_hash(home: u64, log: u32) -> u64 {
    home << (64 - log)
}

/// Well-spread hash for tests that do not script bucket placement.
pub fn spread_hash(tag: u64) -> u64 {
    tag.wrapping_mul(0x9e3779b97f4a7c15)
}

pub fn obj(hash: u64, tag: u64) -> NonNull<TestObj> {
    obj_full(hash, tag, NO_EXPIRY, 16)
}

pub fn obj_ttl(hash: u64, tag: u64, expire_at: u32) -> NonNull<TestObj> {
    obj_full(hash, tag, expire_at, 16)
}

pub fn obj_full(hash: u64, tag: u64, expire_at: u32, weight: usize) -> NonNull<TestObj> {
    NonNull::from(Box::leak(Box::new(TestObj {
        hash,
        tag,
        expire_at,
        weight,
    })))
}

/// Query value for lookups; only `hash` and `tag` matter.
pub fn query(hash: u64, tag: u64) -> TestObj {
    TestObj {
        hash,
        tag,
        expire_at: NO_EXPIRY,
        weight: 0,
    }
}

/// Frees an object the set handed back (duplicate rejections, pops,
/// replaced objects).
pub fn free(obj: NonNull<TestObj>) {
    drop(unsafe { Box::from_raw(obj.as_ptr()) });
}

/// Drains a full scan into tags, starting from cursor 0.
pub fn scan_all<R: MemoryResource>(set: &mut DenseSet<TestPolicy, R>) -> Vec<u64> {
    let mut seen = Vec::new();
    let mut cursor = 0;
    loop {
        cursor = set.scan(cursor, |o| seen.push(o.tag));
        if cursor == 0 {
            return seen;
        }
    }
}

/// Memory resource that tracks outstanding link-cell allocations.
#[derive(Default)]
pub struct CountingResource {
    pub live: Cell<isize>,
    pub total: Cell<usize>,
}

impl MemoryResource for CountingResource {
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        self.live.set(self.live.get() + 1);
        self.total.set(self.total.get() + 1);
        GlobalResource.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.set(self.live.get() - 1);
        GlobalResource.deallocate(ptr, layout);
    }
}
