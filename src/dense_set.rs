//! The dense set: an open-addressed, chained hash set with bounded
//! displacement and lazy TTL expiry.
//!
//! Buckets form a flat power-of-two vector of tagged words. An entry lives
//! in its home bucket, in one of the two neighboring buckets (marked
//! *displaced*, with the direction recorded in the word), or in the home
//! bucket's overflow chain. Bucket ids are derived from the *high* bits of
//! the hash, which keeps the scan cursor stable across growth: when a
//! bucket splits, its keys land in the pair of buckets covering the same
//! hash prefix, so a cursor that has passed the prefix never needs to
//! revisit it.
//!
//! Every traversal opportunistically deletes expired entries it touches;
//! there is no background sweeper and no wall clock. The embedder feeds a
//! monotonic "now" via [`DenseSet::set_time`].

use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use tracing::{error, trace};

use crate::mem::{GlobalResource, MemoryResource};
use crate::policy::SetPolicy;
use crate::reentrancy::Reentrancy;
use crate::slot::{LinkNode, SlotPtr, MIN_PTR_ALIGN};

const MIN_SIZE_SHIFT: u32 = 2;
const MIN_SIZE: usize = 1 << MIN_SIZE_SHIFT;
const ALLOW_DISPLACEMENTS: bool = true;

/// Rejected duplicate insert. Ownership of the offered object returns to
/// the caller.
pub enum InsertError<T> {
    Duplicate(NonNull<T>),
}

impl<T> fmt::Debug for InsertError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(p) => f.debug_tuple("Duplicate").field(p).finish(),
        }
    }
}

/// Result of an internal lookup: the word holding the hit, plus the
/// predecessor word when the hit is a chain cell (null for bucket heads,
/// including displaced neighbor heads). A non-null `prev` is what makes
/// the unlink O(1).
#[derive(Clone, Copy)]
struct FindHit {
    prev: *mut SlotPtr,
    slot: *mut SlotPtr,
}

/// Hash set of opaque object pointers with ±1 displacement, per-bucket
/// chaining, and lazy TTL expiry.
///
/// The set owns the pointers handed to it; objects are released through the
/// policy's `destroy` callback on erase, clear, and drop. Lookup-shaped
/// methods take `&mut self` because any traversal may delete expired
/// entries in place.
///
/// Single-threaded by contract: the type is `!Send + !Sync` and performs no
/// internal synchronization.
pub struct DenseSet<P: SetPolicy, R: MemoryResource = GlobalResource> {
    entries: Vec<SlotPtr>,
    policy: P,
    mr: R,
    size: u32,
    num_used_buckets: u32,
    num_chain_entries: u32,
    obj_malloc_used: usize,
    capacity_log: u32,
    time_now: u32,
    placement_errors: u32,
    reentrancy: Reentrancy,
    _own: PhantomData<NonNull<P::Obj>>,
}

impl<P: SetPolicy> DenseSet<P> {
    /// Creates an empty set backed by the global allocator.
    pub fn new(policy: P) -> Self {
        Self::with_resource(policy, GlobalResource)
    }
}

impl<P: SetPolicy, R: MemoryResource> DenseSet<P, R> {
    /// Creates an empty set whose chain cells come from `mr`.
    pub fn with_resource(policy: P, mr: R) -> Self {
        Self {
            entries: Vec::new(),
            policy,
            mr,
            size: 0,
            num_used_buckets: 0,
            num_chain_entries: 0,
            obj_malloc_used: 0,
            capacity_log: 0,
            time_now: 0,
            placement_errors: 0,
            reentrancy: Reentrancy::new(),
            _own: PhantomData,
        }
    }

    /// Live object count.
    pub fn len(&self) -> usize {
        self.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Sum of `alloc_size` over all stored objects.
    pub fn mem_used(&self) -> usize {
        self.obj_malloc_used
    }

    /// Current bucket vector length (0 or a power of two).
    pub fn bucket_count(&self) -> usize {
        self.entries.len()
    }

    /// Buckets whose head word is non-empty.
    pub fn used_buckets(&self) -> usize {
        self.num_used_buckets as usize
    }

    /// Overflow chain cells currently allocated.
    pub fn chain_entries(&self) -> usize {
        self.num_chain_entries as usize
    }

    /// log2 of the bucket count; 0 iff the set has never held an entry
    /// since the last clear.
    pub fn capacity_log(&self) -> u32 {
        self.capacity_log
    }

    /// Placement inconsistencies observed so far (an unstable hash callback
    /// or corruption). The set stays usable; this exists so embedders and
    /// tests can notice.
    pub fn placement_errors(&self) -> u32 {
        self.placement_errors
    }

    /// Sets the reference instant for lazy expiry. Entries whose
    /// `expire_time` is at or before this value are deleted as traversals
    /// touch them.
    pub fn set_time(&mut self, now: u32) {
        self.time_now = now;
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Grows the bucket vector to hold at least `sz` entries without
    /// chaining. Never shrinks.
    pub fn reserve(&mut self, sz: usize) {
        let _g = self.reentrancy.enter();
        let sz = sz.max(MIN_SIZE).next_power_of_two();
        if sz > self.entries.len() {
            let prev_size = self.entries.len();
            self.entries.resize(sz, SlotPtr::empty());
            self.capacity_log = sz.trailing_zeros();
            unsafe { self.rehash(prev_size) };
        }
    }

    /// Inserts `obj`, taking ownership. If an equal object is already
    /// present the insert is rejected and ownership returns to the caller.
    pub fn insert(
        &mut self,
        obj: NonNull<P::Obj>,
        has_ttl: bool,
    ) -> Result<(), InsertError<P::Obj>> {
        let _g = self.reentrancy.enter();
        debug_assert_eq!(obj.as_ptr() as usize % MIN_PTR_ALIGN, 0);
        unsafe {
            match self.add_or_find_slot(obj.as_ptr(), has_ttl) {
                None => Ok(()),
                Some(_) => Err(InsertError::Duplicate(obj)),
            }
        }
    }

    /// Inserts `obj`, or replaces the equal object already present and
    /// returns it (ownership of the old object moves to the caller).
    pub fn add_or_replace(
        &mut self,
        obj: NonNull<P::Obj>,
        has_ttl: bool,
    ) -> Option<NonNull<P::Obj>> {
        let _g = self.reentrancy.enter();
        debug_assert_eq!(obj.as_ptr() as usize % MIN_PTR_ALIGN, 0);
        unsafe {
            let slot = self.add_or_find_slot(obj.as_ptr(), has_ttl)?;
            let old = (*slot).get_object() as *mut P::Obj;
            self.obj_malloc_used -= self.policy.alloc_size(&*old);
            self.obj_malloc_used += self.policy.alloc_size(obj.as_ref());

            if (*slot).is_link() {
                (*(*slot).as_link())
                    .payload
                    .set_object(obj.as_ptr() as *mut u8);
            } else {
                // The replacement compares equal to the old object, so its
                // home bucket is unchanged; displacement flags on the head
                // must survive the swap.
                let dir = if (*slot).is_displaced() {
                    Some((*slot).displace_dir())
                } else {
                    None
                };
                (*slot).set_object(obj.as_ptr() as *mut u8);
                if let Some(dir) = dir {
                    (*slot).set_displaced(dir);
                }
            }
            (*slot).set_ttl(has_ttl);
            Some(NonNull::new_unchecked(old))
        }
    }

    /// True if an object equal to `query` (under `cookie`) is present.
    pub fn contains(&mut self, query: &P::Obj, cookie: u32) -> bool {
        let _g = self.reentrancy.enter();
        if self.capacity_log == 0 {
            return false;
        }
        unsafe {
            let bid = self.bucket_id(self.policy.hash(query, cookie));
            self.find_slot(query, bid, cookie).is_some()
        }
    }

    /// Pointer to the stored object equal to `query`, if any. The pointer
    /// stays valid until the next mutating call; the object's hash and
    /// equality must not be changed through it.
    pub fn get(&mut self, query: &P::Obj, cookie: u32) -> Option<NonNull<P::Obj>> {
        let _g = self.reentrancy.enter();
        if self.capacity_log == 0 {
            return None;
        }
        unsafe {
            let bid = self.bucket_id(self.policy.hash(query, cookie));
            let hit = self.find_slot(query, bid, cookie)?;
            Some(NonNull::new_unchecked(
                (*hit.slot).get_object() as *mut P::Obj
            ))
        }
    }

    /// Deletes the object equal to `query`, destroying it through the
    /// policy. Returns whether it was present.
    pub fn erase(&mut self, query: &P::Obj, cookie: u32) -> bool {
        let _g = self.reentrancy.enter();
        if self.capacity_log == 0 {
            return false;
        }
        unsafe {
            let bid = self.bucket_id(self.policy.hash(query, cookie));
            match self.find_slot(query, bid, cookie) {
                Some(hit) => {
                    self.delete_slot(hit.prev, hit.slot);
                    true
                }
                None => false,
            }
        }
    }

    /// Removes and returns an arbitrary live object; ownership moves to the
    /// caller. Returns `None` once the set is empty.
    pub fn pop(&mut self) -> Option<NonNull<P::Obj>> {
        let _g = self.reentrancy.enter();
        unsafe {
            let obj = self.pop_internal()?;
            Some(NonNull::new_unchecked(obj))
        }
    }

    /// Stable cursor scan with the same guarantees as the Redis SCAN
    /// command. Start with cursor 0 and keep calling with the returned
    /// cursor until it is 0 again; every object live for the whole sweep is
    /// emitted at least once. Mutations between calls are allowed and may
    /// cause repeats, not misses, for untouched entries.
    ///
    /// The callback must not re-enter the set.
    pub fn scan<F>(&mut self, cursor: u32, mut cb: F) -> u32
    where
        F: FnMut(&P::Obj),
    {
        let _g = self.reentrancy.enter();
        if self.capacity_log == 0 {
            return 0;
        }

        unsafe {
            let mut idx = (cursor >> (32 - self.capacity_log)) as usize;

            // Find the next bucket some entry calls home: its head is live
            // and in place, or a neighbor head is displaced into it.
            while idx < self.entries.len() && self.no_item_belongs(idx) {
                idx += 1;
            }
            if idx == self.entries.len() {
                return 0;
            }

            let mut curr = self.slot_at(idx);
            if !(*curr).is_empty() && !(*curr).is_displaced() {
                loop {
                    cb(&*((*curr).get_object() as *const P::Obj));
                    if !(*curr).is_link() {
                        break;
                    }
                    let next = &mut (*(*curr).as_link()).next as *mut SlotPtr;
                    if self.expire_if_needed(curr, next) && !(*curr).is_link() {
                        break;
                    }
                    curr = &mut (*(*curr).as_link()).next;
                }
            }

            // The left neighbor's head may be displaced out of this bucket.
            if idx > 0 {
                let left = self.slot_at(idx - 1);
                self.expire_if_needed(ptr::null_mut(), left);
                if (*left).is_displaced() && (*left).displace_dir() == -1 {
                    cb(&*((*left).get_object() as *const P::Obj));
                }
            }

            idx += 1;
            if idx >= self.entries.len() {
                return 0;
            }

            // Entries displaced to the right are emitted from the left side
            // so the cursor never has to come back for them.
            let right = self.slot_at(idx);
            self.expire_if_needed(ptr::null_mut(), right);
            if (*right).is_displaced() && (*right).displace_dir() == 1 {
                cb(&*((*right).get_object() as *const P::Obj));
            }

            (idx as u32) << (32 - self.capacity_log)
        }
    }

    /// Destroys every object and returns the set to its initial state.
    pub fn clear(&mut self) {
        let _g = self.reentrancy.enter();
        unsafe { self.clear_internal() }
    }

    // ---- placement ----

    /// Top `capacity_log` bits of the hash.
    fn bucket_id(&self, hash: u64) -> usize {
        debug_assert!(self.capacity_log > 0);
        (hash >> (64 - self.capacity_log)) as usize
    }

    unsafe fn home_of(&self, obj: *const P::Obj) -> usize {
        self.bucket_id(self.policy.hash(&*obj, 0))
    }

    fn slot_at(&mut self, bid: usize) -> *mut SlotPtr {
        debug_assert!(bid < self.entries.len());
        unsafe { self.entries.as_mut_ptr().add(bid) }
    }

    /// Inserts into an empty set or finds the word holding an equal object;
    /// `None` means the object was inserted and the set took ownership.
    unsafe fn add_or_find_slot(&mut self, obj: *mut P::Obj, has_ttl: bool) -> Option<*mut SlotPtr> {
        let hc = self.policy.hash(&*obj, 0);

        if self.entries.is_empty() {
            self.capacity_log = MIN_SIZE_SHIFT;
            self.entries.resize(MIN_SIZE, SlotPtr::empty());
            let bid = self.bucket_id(hc);
            let added = self.push_front_new(bid, obj, has_ttl);
            self.obj_malloc_used += added;
            self.size += 1;
            self.num_used_buckets += 1;
            return None;
        }

        let bid = self.bucket_id(hc);
        if let Some(hit) = self.find_slot(obj as *const P::Obj, bid, 0) {
            return Some(hit.slot);
        }

        self.add_unique(obj, has_ttl, hc);
        None
    }

    /// Places an object known to be absent: flat surface first (home, then
    /// right, then left), growth when full, then a displacement cascade
    /// ending in chain fallback.
    unsafe fn add_unique(&mut self, obj: *mut P::Obj, has_ttl: bool, hashcode: u64) {
        if self.entries.is_empty() {
            self.capacity_log = MIN_SIZE_SHIFT;
            self.entries.resize(MIN_SIZE, SlotPtr::empty());
        }

        let mut bid = self.bucket_id(hashcode);

        for _ in 0..2 {
            if let Some(empty) = self.find_empty_around(bid) {
                let added = self.push_front_new(empty, obj, has_ttl);
                self.obj_malloc_used += added;
                if empty != bid {
                    let dir = empty as isize - bid as isize;
                    self.entries[empty].set_displaced(dir as i32);
                }
                self.num_used_buckets += 1;
                self.size += 1;
                return;
            }

            if (self.size as usize) < self.entries.len() {
                break;
            }

            let prev_size = self.entries.len();
            self.entries.resize(prev_size * 2, SlotPtr::empty());
            self.capacity_log += 1;
            trace!(from = prev_size, to = self.entries.len(), "doubling bucket vector");
            self.rehash(prev_size);
            bid = self.bucket_id(hashcode);
        }

        debug_assert!(!self.entries[bid].is_empty());

        // An unstable hash callback shows up as the home bucket moving
        // between two computations over the same object.
        if self.bucket_id(self.policy.hash(&*obj, 0)) != bid {
            error!(bucket = bid, "home bucket moved between hash computations");
            self.placement_errors += 1;
        }

        // The home head is either a live chain or a displaced entry. Evict
        // displaced heads back to their own homes rather than chaining a
        // foreign bucket: hold one evictee at a time, install the current
        // holder, and follow the evictee's recorded direction. The walk
        // visits at most the run of consecutive displaced heads.
        let mut to_insert = SlotPtr::empty();
        to_insert.set_object(obj as *mut u8);
        if has_ttl {
            to_insert.set_ttl(true);
        }

        while !self.entries[bid].is_empty() && self.entries[bid].is_displaced() {
            let unlinked = self.pop_ptr_front(bid);
            debug_assert!(unlinked.is_object());

            self.push_front_ptr(bid, to_insert);

            let home = (bid as isize - unlinked.displace_dir() as isize) as usize;
            let victim = unlinked.raw() as *mut P::Obj;
            let victim_home = self.home_of(victim);
            if home != victim_home {
                error!(
                    bucket = home,
                    correct = victim_home,
                    "displacement direction disagrees with the victim's home"
                );
                self.placement_errors += 1;
                debug_assert_eq!(home, victim_home);
            }

            to_insert = unlinked;
            bid = home;
        }

        if self.entries[bid].is_empty() {
            // The cascade can end in a bucket whose occupant was erased
            // after the victim was displaced out of it.
            self.num_used_buckets += 1;
        } else {
            self.num_chain_entries += 1;
        }

        self.push_front_ptr(bid, to_insert);
        debug_assert!(!self.entries[bid].is_displaced());

        self.obj_malloc_used += self.policy.alloc_size(&*obj);
        self.size += 1;
    }

    /// First empty slot among home, right neighbor, left neighbor, in that
    /// order, after sweeping expired entries out of each.
    unsafe fn find_empty_around(&mut self, bid: usize) -> Option<usize> {
        let home = self.slot_at(bid);
        self.expire_if_needed(ptr::null_mut(), home);
        if self.entries[bid].is_empty() {
            return Some(bid);
        }

        if !ALLOW_DISPLACEMENTS {
            return None;
        }

        if bid + 1 < self.entries.len() {
            let right = self.slot_at(bid + 1);
            self.expire_if_needed(ptr::null_mut(), right);
            if self.entries[bid + 1].is_empty() {
                return Some(bid + 1);
            }
        }

        if bid > 0 {
            let left = self.slot_at(bid - 1);
            self.expire_if_needed(ptr::null_mut(), left);
            if self.entries[bid - 1].is_empty() {
                return Some(bid - 1);
            }
        }

        None
    }

    /// True when nothing calls bucket `bid` home: its head is empty or
    /// displaced elsewhere, and neither neighbor head is displaced into it.
    unsafe fn no_item_belongs(&mut self, bid: usize) -> bool {
        let home = self.slot_at(bid);
        self.expire_if_needed(ptr::null_mut(), home);
        if !self.entries[bid].is_empty() && !self.entries[bid].is_displaced() {
            return false;
        }

        if bid + 1 < self.entries.len() {
            let right = self.slot_at(bid + 1);
            self.expire_if_needed(ptr::null_mut(), right);
            let w = self.entries[bid + 1];
            if !w.is_empty() && w.is_displaced() && w.displace_dir() == 1 {
                return false;
            }
        }

        if bid > 0 {
            let left = self.slot_at(bid - 1);
            self.expire_if_needed(ptr::null_mut(), left);
            let w = self.entries[bid - 1];
            if !w.is_empty() && w.is_displaced() && w.displace_dir() == -1 {
                return false;
            }
        }

        true
    }

    /// Looks for `query` at its home, then both neighbor heads (displaced
    /// entries are cheaper to rule out than a chain walk), then along the
    /// home chain.
    unsafe fn find_slot(&mut self, query: *const P::Obj, bid: usize, cookie: u32) -> Option<FindHit> {
        debug_assert!(bid < self.entries.len());

        let head = self.slot_at(bid);
        self.expire_if_needed(ptr::null_mut(), head);
        if self.equal_slot(*head, query, cookie) {
            return Some(FindHit { prev: ptr::null_mut(), slot: head });
        }

        if bid > 0 {
            let left = self.slot_at(bid - 1);
            self.expire_if_needed(ptr::null_mut(), left);
            if self.equal_slot(*left, query, cookie) {
                return Some(FindHit { prev: ptr::null_mut(), slot: left });
            }
        }

        if bid + 1 < self.entries.len() {
            let right = self.slot_at(bid + 1);
            self.expire_if_needed(ptr::null_mut(), right);
            if self.equal_slot(*right, query, cookie) {
                return Some(FindHit { prev: ptr::null_mut(), slot: right });
            }
        }

        let mut prev = self.slot_at(bid);
        let mut curr = (*prev).next();
        while !curr.is_null() {
            self.expire_if_needed(prev, curr);
            if !(*prev).is_link() {
                // The tail expired out and the chain collapsed behind us;
                // the cell `curr` pointed into is gone.
                break;
            }
            if self.equal_slot(*curr, query, cookie) {
                return Some(FindHit { prev, slot: curr });
            }
            prev = curr;
            curr = (*curr).next();
        }

        None
    }

    unsafe fn equal_slot(&self, word: SlotPtr, query: *const P::Obj, cookie: u32) -> bool {
        if word.is_empty() {
            return false;
        }
        self.policy
            .equal(&*(word.get_object() as *const P::Obj), &*query, cookie)
    }

    /// Unlinks the payload behind `node` and destroys it. `prev` is the
    /// owning link word when `node` extends a chain, null for bucket heads.
    /// When the deletion collapses `*prev` into an inline object, the cell
    /// `node` pointed into has been freed.
    unsafe fn delete_slot(&mut self, prev: *mut SlotPtr, node: *mut SlotPtr) {
        let obj;
        if (*node).is_object() {
            obj = (*node).raw() as *mut P::Obj;
            (*node).reset();
            if prev.is_null() {
                self.num_used_buckets -= 1;
            } else {
                debug_assert!((*prev).is_link());
                self.num_chain_entries -= 1;

                let plink = (*prev).as_link();
                debug_assert!(ptr::eq(&(*plink).next, node));
                let mut promoted = SlotPtr::from_link(plink);
                // The outer word's TTL bit describes this payload; carry it
                // onto the promoted inline word.
                if (*prev).has_ttl() {
                    promoted.set_ttl(true);
                }
                self.free_link(plink);
                *prev = promoted;
                debug_assert!(!(*prev).is_link());
            }
        } else {
            debug_assert!((*node).is_link());
            let link = (*node).as_link();
            obj = (*link).payload.raw() as *mut P::Obj;
            *node = (*link).next;
            self.num_chain_entries -= 1;
            self.free_link(link);
        }

        self.obj_malloc_used -= self.policy.alloc_size(&*obj);
        self.size -= 1;
        self.policy.destroy(NonNull::new_unchecked(obj), false);
    }

    /// Deletes the payload behind `node` while it carries the TTL bit and
    /// its expiry has passed; a deletion exposes the next chain entry in
    /// place, which may itself be expired. Returns whether anything was
    /// deleted; callers must then re-read `*node`, and must not touch
    /// `node` at all once `*prev` has collapsed into an inline object.
    unsafe fn expire_if_needed(&mut self, prev: *mut SlotPtr, node: *mut SlotPtr) -> bool {
        if !(*node).has_ttl() {
            return false;
        }

        let mut deleted = false;
        loop {
            let obj = (*node).get_object() as *const P::Obj;
            if self.policy.expire_time(&*obj) > self.time_now {
                break;
            }

            self.delete_slot(prev, node);
            deleted = true;

            if !prev.is_null() && !(*prev).is_link() {
                // The cell holding `node` went away with the collapse.
                break;
            }
            if !(*node).has_ttl() {
                break;
            }
        }
        deleted
    }

    // ---- chain primitives ----

    fn link_layout() -> Layout {
        Layout::new::<LinkNode>()
    }

    unsafe fn new_link(&mut self, data: *mut P::Obj, next: SlotPtr) -> *mut LinkNode {
        let raw = self.mr.allocate(Self::link_layout()).cast::<LinkNode>().as_ptr();
        let mut payload = SlotPtr::empty();
        payload.set_object(data as *mut u8);
        raw.write(LinkNode { payload, next });
        raw
    }

    unsafe fn free_link(&mut self, link: *mut LinkNode) {
        self.mr
            .deallocate(NonNull::new_unchecked(link).cast(), Self::link_layout());
    }

    /// Pushes a fresh object to the front of bucket `bid`; returns its
    /// alloc size for memory accounting.
    unsafe fn push_front_new(&mut self, bid: usize, obj: *mut P::Obj, has_ttl: bool) -> usize {
        let head = self.slot_at(bid);
        if (*head).is_empty() {
            (*head).set_object(obj as *mut u8);
        } else {
            let link = self.new_link(obj, *head);
            (*head).set_link(link);
        }
        if has_ttl {
            (*head).set_ttl(true);
        }
        self.policy.alloc_size(&*obj)
    }

    /// Re-links an already-owned word (an unlinked head or chain cell) to
    /// the front of bucket `bid`, reusing its cell when it has one.
    /// Displacement flags are not carried; the TTL bit is.
    unsafe fn push_front_ptr(&mut self, bid: usize, word: SlotPtr) {
        let head = self.slot_at(bid);
        if (*head).is_empty() {
            (*head).set_object(word.get_object());
            if word.has_ttl() {
                (*head).set_ttl(true);
            }
            if word.is_link() {
                self.free_link(word.as_link());
            }
        } else if word.is_link() {
            // The cell comes with its own allocation; splice it in front.
            *word.next() = *head;
            *head = word;
            debug_assert!(!(*(*head).as_link()).next.is_empty());
        } else {
            debug_assert!(word.is_object());
            let link = self.new_link(word.raw() as *mut P::Obj, *head);
            (*head).set_link(link);
            if word.has_ttl() {
                (*head).set_ttl(true);
            }
        }
    }

    /// Detaches and returns the front word of bucket `bid` with its flags
    /// intact. A returned link word still owns its cell (with a stale
    /// `next`); the caller frees or re-links it.
    unsafe fn pop_ptr_front(&mut self, bid: usize) -> SlotPtr {
        let head = self.slot_at(bid);
        if (*head).is_empty() {
            return SlotPtr::empty();
        }

        let front = *head;
        if front.is_object() {
            (*head).reset();
        } else {
            *head = *front.next();
        }
        front
    }

    /// Pops the front object of bucket `bid`, reclaiming its cell.
    unsafe fn pop_data_front(&mut self, bid: usize) -> *mut P::Obj {
        let front = self.pop_ptr_front(bid);
        debug_assert!(!front.is_empty());
        let obj = front.get_object() as *mut P::Obj;
        if front.is_link() {
            self.free_link(front.as_link());
        }
        obj
    }

    unsafe fn pop_internal(&mut self) -> Option<*mut P::Obj> {
        if self.entries.is_empty() {
            return None;
        }

        let mut bid = 0usize;
        loop {
            while bid < self.entries.len() && self.entries[bid].is_empty() {
                bid += 1;
            }
            if bid == self.entries.len() {
                return None;
            }
            let head = self.slot_at(bid);
            self.expire_if_needed(ptr::null_mut(), head);
            if !self.entries[bid].is_empty() {
                break;
            }
        }

        if self.entries[bid].is_link() {
            self.num_chain_entries -= 1;
        } else {
            debug_assert!(self.entries[bid].is_object());
            self.num_used_buckets -= 1;
        }

        let obj = self.entries[bid].get_object() as *mut P::Obj;
        self.obj_malloc_used -= self.policy.alloc_size(&*obj);
        let popped = self.pop_data_front(bid);
        debug_assert_eq!(popped, obj);
        self.size -= 1;
        Some(popped)
    }

    // ---- growth ----

    /// Relocates entries after the bucket vector doubled (or `reserve`
    /// multiplied it). Walks old buckets from the highest index down so a
    /// relocated entry never lands in a bucket that still awaits
    /// processing; every relocation clears the displaced flag, since a
    /// fresh placement is exact-home by definition.
    unsafe fn rehash(&mut self, prev_size: usize) {
        for i in (0..prev_size).rev() {
            let mut prev: *mut SlotPtr = ptr::null_mut();
            let mut curr: *mut SlotPtr = self.slot_at(i);

            loop {
                if self.expire_if_needed(prev, curr) && !prev.is_null() && !(*prev).is_link() {
                    break;
                }
                if (*curr).is_empty() {
                    break;
                }

                let obj = (*curr).get_object() as *mut P::Obj;
                let bid = self.home_of(obj);

                if bid == i {
                    (*curr).clear_displaced();
                    prev = curr;
                    curr = (*curr).next();
                    if curr.is_null() {
                        break;
                    }
                    continue;
                }

                let word = *curr;
                if word.is_object() {
                    (*curr).reset();
                    if prev.is_null() {
                        // The head moved out and nothing follows it.
                        self.num_used_buckets -= 1;
                    } else {
                        debug_assert!((*prev).is_link());
                        let plink = (*prev).as_link();
                        debug_assert!(ptr::eq(&(*plink).next, curr));
                        let mut promoted = SlotPtr::from_link(plink);
                        if (*prev).has_ttl() {
                            promoted.set_ttl(true);
                        }
                        self.free_link(plink);
                        *prev = promoted;
                        self.num_chain_entries -= 1;
                    }
                    self.check_relocation(obj, bid, prev_size);
                    self.relocate_front(bid, word);
                    break;
                }

                // Chain cell: promote the remainder into this position and
                // re-link the cell at its new home, then re-examine the
                // shifted chain from the same spot.
                self.num_chain_entries -= 1;
                *curr = *word.next();
                debug_assert!(!(*curr).is_empty());
                self.check_relocation(obj, bid, prev_size);
                self.relocate_front(bid, word);
            }
        }
    }

    /// Pushes a detached word to the front of its new home during a rehash,
    /// keeping the bucket/chain accounting structural. A relocation is
    /// exact-home by definition, so the displaced flag is dropped.
    unsafe fn relocate_front(&mut self, bid: usize, word: SlotPtr) {
        let dest_was_empty = self.entries[bid].is_empty();
        self.push_front_ptr(bid, word);
        if dest_was_empty {
            self.num_used_buckets += 1;
        } else {
            self.num_chain_entries += 1;
        }
        let dest = self.slot_at(bid);
        (*dest).clear_displaced();
    }

    unsafe fn check_relocation(&mut self, obj: *const P::Obj, bid: usize, prev_size: usize) {
        let fresh = self.home_of(obj);
        if fresh != bid {
            error!(
                bucket = bid,
                correct = fresh,
                from = prev_size,
                to = self.entries.len(),
                "relocated entry does not hash to its target bucket"
            );
            self.placement_errors += 1;
        }
    }

    // ---- teardown ----

    unsafe fn clear_internal(&mut self) {
        for bid in 0..self.entries.len() {
            while !self.entries[bid].is_empty() {
                let head = self.entries[bid];
                let has_ttl = head.has_ttl();
                let obj = self.pop_data_front(bid);

                #[cfg(debug_assertions)]
                {
                    let delta = self.home_of(obj) as isize - bid as isize;
                    if head.is_displaced() {
                        debug_assert!(delta.abs() == 1);
                    } else {
                        debug_assert_eq!(delta, 0);
                    }
                }

                self.policy.destroy(NonNull::new_unchecked(obj), has_ttl);
            }
        }

        self.entries.clear();
        self.capacity_log = 0;
        self.num_used_buckets = 0;
        self.num_chain_entries = 0;
        self.size = 0;
        self.obj_malloc_used = 0;
    }
}

impl<P: SetPolicy, R: MemoryResource> Drop for DenseSet<P, R> {
    fn drop(&mut self) {
        unsafe { self.clear_internal() }
    }
}
