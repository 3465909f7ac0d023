//! Component F: the indirect-call table (spec §4.6).
//!
//! A reserved, partially-committed virtual-memory region holding fixed-size
//! `{type_tag, code}` slots that generated code indexes directly
//! (`lower::operators::lower_call_indirect`), kept in lockstep with a
//! logical `elements` vector the host mutates through `set_element`.
//! Grounded on `bundle_ref/loader.rs`'s `load_executable_code`, the only
//! file in the retrieval pack that drives `libc::mmap`/`mprotect`/`munmap`
//! directly, under the same `#[cfg(unix)]`/`#[cfg(not(unix))]` split.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::TableError;
use crate::module::TableDescriptor;

/// A function reference as stored in a table slot: the expected-type tag
/// `lower_call_indirect` compares against, and the native code pointer it
/// dispatches to on a match (spec §4.6, §6 "Table memory layout").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncRef {
    pub type_tag: i64,
    pub code: usize,
}

/// Host pointer width in bytes, `W` in spec §6's `2*W`-sized slot layout.
const POINTER_WIDTH: usize = std::mem::size_of::<usize>();
const SLOT_SIZE: usize = 2 * POINTER_WIDTH;

#[cfg(target_pointer_width = "64")]
const RESERVATION_BYTES: usize = 16 * 1024 * 1024 * 1024;
#[cfg(target_pointer_width = "64")]
const RESERVATION_ALIGN: usize = 4 * 1024 * 1024 * 1024;

#[cfg(not(target_pointer_width = "64"))]
const RESERVATION_BYTES: usize = 16 * 1024 * 1024;
#[cfg(not(target_pointer_width = "64"))]
const RESERVATION_ALIGN: usize = 1;

fn page_size() -> usize {
    #[cfg(unix)]
    {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    }
    #[cfg(not(unix))]
    {
        4096
    }
}

fn round_up(value: usize, multiple: usize) -> usize {
    (value + multiple - 1) / multiple * multiple
}

/// The raw reservation backing a table's `slots` array. Holds the mmap'd
/// base pointer and length; everything committed/decommitted lives inside
/// this fixed range (spec §3 "Table", §4.6 "Creation reserves a large
/// virtual address range").
struct Reservation {
    base: *mut u8,
    len: usize,
}

// Safety: the reservation is only ever read/written through `Table`'s own
// `&mut self` methods (commit/decommit/set_element), which require
// exclusive access via `TableHandle`'s `RwLock`; raw slot reads from
// generated code are outside Rust's aliasing model entirely, same as any
// JIT-managed memory.
unsafe impl Send for Reservation {}
unsafe impl Sync for Reservation {}

impl Reservation {
    #[cfg(unix)]
    fn reserve(size: usize, align: usize) -> Result<Self, TableError> {
        if align <= 1 {
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_NONE,
                    libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(TableError::ReserveFailed(size));
            }
            return Ok(Self { base: ptr as *mut u8, len: size });
        }

        // Over-reserve by `align` so an aligned sub-range of exactly `size`
        // can be carved out, then release the unaligned head/tail slack.
        let padded = size + align;
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                padded,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(TableError::ReserveFailed(size));
        }
        let raw_addr = raw as usize;
        let aligned_addr = round_up(raw_addr, align);
        let head_slack = aligned_addr - raw_addr;
        let tail_slack = padded - head_slack - size;

        unsafe {
            if head_slack > 0 {
                libc::munmap(raw, head_slack);
            }
            if tail_slack > 0 {
                libc::munmap((aligned_addr + size) as *mut libc::c_void, tail_slack);
            }
        }
        Ok(Self { base: aligned_addr as *mut u8, len: size })
    }

    /// Commit the byte range `[old_end, new_end)`: the caller already knows
    /// `[0, old_end)` is committed, so only the newly-required pages are
    /// mprotect'd.
    #[cfg(unix)]
    fn commit(&self, old_end: usize, new_end: usize) -> Result<(), TableError> {
        if new_end <= old_end {
            return Ok(());
        }
        let len = new_end - old_end;
        let result = unsafe {
            libc::mprotect(
                self.base.add(old_end) as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if result != 0 {
            return Err(TableError::CommitFailed { offset: old_end, len });
        }
        Ok(())
    }

    /// Decommit everything past `new_end`: drop the protection to
    /// `PROT_NONE` and hint the kernel to reclaim the backing pages.
    #[cfg(unix)]
    fn decommit_from(&self, new_end: usize, old_end: usize) -> Result<(), TableError> {
        if old_end <= new_end {
            return Ok(());
        }
        let len = old_end - new_end;
        unsafe {
            let addr = self.base.add(new_end) as *mut libc::c_void;
            if libc::mprotect(addr, len, libc::PROT_NONE) != 0 {
                return Err(TableError::DecommitFailed { offset: new_end, len });
            }
            libc::madvise(addr, len, libc::MADV_DONTNEED);
        }
        Ok(())
    }

    #[cfg(unix)]
    fn release(&mut self) {
        if !self.base.is_null() && self.len > 0 {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.len);
            }
            self.base = std::ptr::null_mut();
            self.len = 0;
        }
    }

    #[cfg(not(unix))]
    fn reserve(size: usize, _align: usize) -> Result<Self, TableError> {
        let _ = size;
        Err(TableError::ReserveFailed(size))
    }

    #[cfg(not(unix))]
    fn commit(&self, _old_end: usize, _new_end: usize) -> Result<(), TableError> {
        Err(TableError::CommitFailed { offset: 0, len: 0 })
    }

    #[cfg(not(unix))]
    fn decommit_from(&self, _new_end: usize, _old_end: usize) -> Result<(), TableError> {
        Err(TableError::DecommitFailed { offset: 0, len: 0 })
    }

    #[cfg(not(unix))]
    fn release(&mut self) {}

    fn contains(&self, addr: usize) -> bool {
        let base = self.base as usize;
        !self.base.is_null() && addr >= base && addr < base + self.len
    }

    /// Raw pointer to slot `i`'s type-tag word (offset `0`); the code
    /// pointer lives at `+ POINTER_WIDTH` (spec §6 "Table memory layout").
    unsafe fn slot_ptr(&self, index: u32) -> *mut usize {
        self.base.add(index as usize * SLOT_SIZE) as *mut usize
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}

/// The indirect-call table itself (spec §3 "Table", §4.6). Reserved once at
/// creation; `committed_end` only ever tracks bytes actually backed by
/// physical pages, always rounded up to a full page.
pub struct Table {
    reservation: Reservation,
    committed_end: usize,
    num_elements: u32,
    min: u32,
    max: u32,
    elements: Vec<Option<FuncRef>>,
    id: u64,
}

fn next_table_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

impl Table {
    /// Reserve the table's virtual address range and grow it to the
    /// descriptor's declared minimum (spec §4.6 "Creation ... then it grows
    /// to the type's declared minimum").
    fn create(descriptor: TableDescriptor) -> Result<Self, TableError> {
        let reservation = Reservation::reserve(RESERVATION_BYTES, RESERVATION_ALIGN)?;
        let mut table = Table {
            reservation,
            committed_end: 0,
            num_elements: 0,
            min: descriptor.min,
            max: descriptor.max,
            elements: Vec::new(),
            id: next_table_id(),
        };
        if descriptor.min > 0 {
            table.grow(descriptor.min)?;
        }
        tracing::debug!(table_id = table.id, num_elements = table.num_elements, "table created");
        Ok(table)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn num_elements(&self) -> u32 {
        self.num_elements
    }

    /// The base address generated code indexes from (spec §6).
    pub fn slots_base(&self) -> usize {
        self.reservation.base as usize
    }

    /// Element-count bound for `call_indirect`'s bounds check (spec §9:
    /// "Resolved: element-count").
    pub fn end_offset(&self) -> u32 {
        self.num_elements
    }

    /// The opaque handle generated code passes to
    /// `indirect_call_signature_mismatch` (spec §6). Reuses the table's
    /// stable identity rather than a second allocation.
    pub fn table_handle(&self) -> i64 {
        self.id as i64
    }

    /// `set_element(t, i, obj)` (spec §4.6): writes both the physical slot
    /// and the logical `elements` entry, returning the previous occupant.
    pub fn set_element(&mut self, index: u32, obj: FuncRef) -> Result<Option<FuncRef>, TableError> {
        if index >= self.num_elements {
            return Err(TableError::IndexOutOfBounds { index, size: self.num_elements });
        }
        unsafe {
            let slot = self.reservation.slot_ptr(index);
            std::ptr::write_volatile(slot, obj.type_tag as usize);
            std::ptr::write_volatile(slot.add(1), obj.code);
        }
        let previous = self.elements[index as usize];
        self.elements[index as usize] = Some(obj);
        Ok(previous)
    }

    pub fn get_element(&self, index: u32) -> Result<Option<FuncRef>, TableError> {
        self.elements
            .get(index as usize)
            .copied()
            .ok_or(TableError::IndexOutOfBounds { index, size: self.num_elements })
    }

    /// `grow(t, k) -> previous_N` (spec §4.6). Commits whatever additional
    /// pages `(N+k)*slotsize` requires; on commit failure, `elements` is
    /// left untouched.
    pub fn grow(&mut self, delta: u32) -> Result<u32, TableError> {
        let previous = self.num_elements;
        if delta == 0 {
            return Ok(previous);
        }
        if delta > self.max - self.num_elements {
            return Err(TableError::WouldExceedMaximum {
                requested: delta,
                max: self.max,
            });
        }
        let new_count = self.num_elements + delta;
        let new_committed = round_up(new_count as usize * SLOT_SIZE, page_size());
        if new_committed > self.committed_end {
            self.reservation.commit(self.committed_end, new_committed)?;
        }
        self.elements.extend(std::iter::repeat(None).take(delta as usize));
        self.committed_end = new_committed;
        self.num_elements = new_count;
        tracing::debug!(table_id = self.id, num_elements = self.num_elements, "table grown");
        Ok(previous)
    }

    /// `shrink(t, k) -> previous_N` (spec §4.6). Decommits pages no longer
    /// needed; the reservation itself is never released.
    pub fn shrink(&mut self, delta: u32) -> Result<u32, TableError> {
        let previous = self.num_elements;
        if delta == 0 {
            return Ok(previous);
        }
        if delta > self.num_elements {
            return Err(TableError::IndexOutOfBounds {
                index: delta,
                size: self.num_elements,
            });
        }
        let new_count = self.num_elements - delta;
        if new_count < self.min {
            return Err(TableError::WouldDropBelowMinimum {
                requested: delta,
                min: self.min,
            });
        }
        self.elements.truncate(new_count as usize);
        let new_committed = round_up(new_count as usize * SLOT_SIZE, page_size());
        if new_committed < self.committed_end {
            self.reservation.decommit_from(new_committed, self.committed_end)?;
        }
        self.committed_end = new_committed;
        self.num_elements = new_count;
        tracing::debug!(table_id = self.id, num_elements = self.num_elements, "table shrunk");
        Ok(previous)
    }

    fn owns_address(&self, addr: usize) -> bool {
        self.reservation.contains(addr)
    }
}

/// A reference-counted, internally-synchronized table handle: what
/// `TableRegistry` tracks and what the host shares with generated code's
/// resolved `table_handle` constant (spec §4.6 "registered in a
/// process-wide list").
pub struct TableHandle {
    inner: RwLock<Table>,
}

impl TableHandle {
    pub fn create(descriptor: TableDescriptor) -> Result<Arc<Self>, TableError> {
        let table = Table::create(descriptor)?;
        Ok(Arc::new(Self { inner: RwLock::new(table) }))
    }

    pub fn id(&self) -> u64 {
        self.inner.read().id()
    }

    pub fn num_elements(&self) -> u32 {
        self.inner.read().num_elements()
    }

    pub fn slots_base(&self) -> usize {
        self.inner.read().slots_base()
    }

    pub fn end_offset(&self) -> u32 {
        self.inner.read().end_offset()
    }

    pub fn table_handle(&self) -> i64 {
        self.inner.read().table_handle()
    }

    pub fn set_element(&self, index: u32, obj: FuncRef) -> Result<Option<FuncRef>, TableError> {
        self.inner.write().set_element(index, obj)
    }

    pub fn get_element(&self, index: u32) -> Result<Option<FuncRef>, TableError> {
        self.inner.read().get_element(index)
    }

    pub fn grow(&self, delta: u32) -> Result<u32, TableError> {
        self.inner.write().grow(delta)
    }

    pub fn shrink(&self, delta: u32) -> Result<u32, TableError> {
        self.inner.write().shrink(delta)
    }

    fn owns_address(&self, addr: usize) -> bool {
        self.inner.read().owns_address(addr)
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        let id = self.inner.read().id;
        tracing::debug!(table_id = id, "table destroyed");
    }
}

/// The process-wide registry fault handlers consult to attribute an
/// out-of-range access to a table (spec §4.6 `is_address_owned_by_any_table`,
/// §5 "Registry realization" — a `parking_lot::RwLock<Vec<Weak<...>>>`
/// owned by an explicit value rather than a global `static`).
#[derive(Default)]
pub struct TableRegistry {
    tables: RwLock<Vec<Weak<TableHandle>>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: &Arc<TableHandle>) {
        self.tables.write().push(Arc::downgrade(handle));
    }

    /// Linear scan for fault-handler attribution (spec §4.6), pruning dead
    /// entries for tables that have since been destroyed.
    pub fn is_address_owned_by_any_table(&self, addr: usize) -> bool {
        let mut found = false;
        self.tables.write().retain(|weak| match weak.upgrade() {
            Some(handle) => {
                if handle.owns_address(addr) {
                    found = true;
                }
                true
            }
            None => false,
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(min: u32, max: u32) -> TableDescriptor {
        TableDescriptor { min, max }
    }

    #[test]
    #[cfg(unix)]
    fn create_grows_to_minimum() {
        let table = Table::create(descriptor(1, 10)).unwrap();
        assert_eq!(table.num_elements(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn grow_and_shrink_scenario() {
        // Spec §8 concrete scenario 6.
        let mut table = Table::create(descriptor(1, 10)).unwrap();
        assert_eq!(table.num_elements(), 1);

        let previous = table.grow(5).unwrap();
        assert_eq!(previous, 1);
        assert_eq!(table.num_elements(), 6);

        let previous = table.shrink(4).unwrap();
        assert_eq!(previous, 6);
        assert_eq!(table.num_elements(), 2);

        let err = table.shrink(2).unwrap_err();
        assert!(matches!(err, TableError::WouldDropBelowMinimum { requested: 2, min: 1 }));
        assert_eq!(table.num_elements(), 2);
    }

    #[test]
    #[cfg(unix)]
    fn grow_zero_is_a_no_op() {
        let mut table = Table::create(descriptor(1, 10)).unwrap();
        let previous = table.grow(0).unwrap();
        assert_eq!(previous, 1);
        assert_eq!(table.num_elements(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn shrink_zero_is_a_no_op() {
        let mut table = Table::create(descriptor(2, 10)).unwrap();
        let previous = table.shrink(0).unwrap();
        assert_eq!(previous, 2);
        assert_eq!(table.num_elements(), 2);
    }

    #[test]
    #[cfg(unix)]
    fn grow_past_maximum_fails() {
        let mut table = Table::create(descriptor(1, 2)).unwrap();
        let err = table.grow(5).unwrap_err();
        assert!(matches!(err, TableError::WouldExceedMaximum { requested: 5, max: 2 }));
    }

    #[test]
    #[cfg(unix)]
    fn set_element_round_trips_through_physical_slots() {
        let mut table = Table::create(descriptor(4, 4)).unwrap();
        let f = FuncRef { type_tag: 0x1234, code: 0xABCD };
        let previous = table.set_element(2, f).unwrap();
        assert_eq!(previous, None);
        assert_eq!(table.get_element(2).unwrap(), Some(f));

        unsafe {
            let slot = table.reservation.slot_ptr(2);
            assert_eq!(std::ptr::read_volatile(slot), f.type_tag as usize);
            assert_eq!(std::ptr::read_volatile(slot.add(1)), f.code);
        }
    }

    #[test]
    #[cfg(unix)]
    fn set_element_out_of_bounds_is_rejected() {
        let mut table = Table::create(descriptor(1, 1)).unwrap();
        let err = table
            .set_element(5, FuncRef { type_tag: 0, code: 0 })
            .unwrap_err();
        assert!(matches!(err, TableError::IndexOutOfBounds { index: 5, size: 1 }));
    }

    #[test]
    #[cfg(unix)]
    fn registry_tracks_address_ownership() {
        let registry = TableRegistry::new();
        let handle = TableHandle::create(descriptor(1, 1)).unwrap();
        registry.register(&handle);

        let base = handle.slots_base();
        assert!(registry.is_address_owned_by_any_table(base));
        assert!(!registry.is_address_owned_by_any_table(base.wrapping_sub(1)));

        drop(handle);
        assert!(!registry.is_address_owned_by_any_table(base));
    }
}
