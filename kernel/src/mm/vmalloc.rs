//! Kernel virtual arena
//!
//! Page-granular allocations in a virtual range distinct from both the
//! kernel window and every process region. Each allocation reserves a run of
//! virtual pages, backs every page with a heap frame and maps it into the
//! current directory; deallocation unmaps and releases the frames, then the
//! range coalesces with free neighbors.
//!
//! The block list itself lives in heap records (one node per range), kept
//! sorted by virtual address so adjacency checks are a pointer-chase away.

use log::warn;

use super::heap::Heap;
use super::paging::Paging;
use super::window::PhysWindow;
use super::{align_up, PageFlags, PhysAddr, VirtAddr, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::platform::Platform;

/// Base of the arena's virtual range.
pub const VMEM_START: u32 = 0x2000_0000;

/// Size of the arena's virtual range (256 MiB).
pub const VMEM_SIZE: u32 = 0x1000_0000;

/// Magic cookie stamped into every arena node.
const VMEM_MAGIC: u32 = 0xCAFE_BABE;

const NODE_SIZE: u32 = core::mem::size_of::<VmemNode>() as u32;

/// One range of the arena, stored as a heap record.
#[repr(C)]
#[derive(Clone, Copy)]
struct VmemNode {
    size: u32,
    free: u32,
    virt: u32,
    /// Physical address of the successor node, 0 at the tail.
    next: u32,
    magic: u32,
}

/// Arena statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArenaStats {
    pub allocated_bytes: u64,
    pub freed_bytes: u64,
}

impl ArenaStats {
    pub fn used_bytes(&self) -> u64 {
        self.allocated_bytes - self.freed_bytes
    }
}

/// The kernel virtual arena allocator.
pub struct VirtArena {
    head: PhysAddr,
    stats: ArenaStats,
}

impl VirtArena {
    /// Set up the arena as one free range covering [`VMEM_START`],
    /// [`VMEM_SIZE`].
    pub fn init(window: &mut PhysWindow, heap: &mut Heap) -> KernelResult<Self> {
        let head = heap.alloc(window, NODE_SIZE).ok_or(KernelError::OutOfMemory)?;
        window.write(
            head,
            VmemNode { size: VMEM_SIZE, free: 1, virt: VMEM_START, next: 0, magic: VMEM_MAGIC },
        );
        log::info!(target: "vmalloc", "virtual arena: {} MiB at {:#010x}", VMEM_SIZE >> 20, VMEM_START);
        Ok(Self { head, stats: ArenaStats::default() })
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats
    }

    fn node(&self, window: &PhysWindow, at: PhysAddr) -> VmemNode {
        window.read(at)
    }

    /// Reserve a page-multiple range and back every page with a mapped heap
    /// frame. Returns `None` on exhaustion of either the range or the heap;
    /// a partial failure rolls the allocation back completely.
    pub fn alloc<P: Platform>(
        &mut self,
        window: &mut PhysWindow,
        heap: &mut Heap,
        paging: &Paging,
        platform: &mut P,
        size: u32,
    ) -> Option<VirtAddr> {
        if size == 0 {
            return None;
        }
        let size = align_up(size, PAGE_SIZE);

        // First fit over the sorted list.
        let mut cursor = self.head;
        let block = loop {
            let node = self.node(window, cursor);
            if node.free != 0 && node.size >= size {
                break cursor;
            }
            if node.next == 0 {
                warn!(target: "vmalloc", "alloc of {size} bytes failed: arena exhausted");
                return None;
            }
            cursor = PhysAddr(node.next);
        };

        // Split the trailing remainder into its own node. When the record
        // allocation fails the block is handed out unsplit; the excess
        // returns at free time.
        let mut node = self.node(window, block);
        if node.size > size {
            if let Some(rest) = heap.alloc(window, NODE_SIZE) {
                window.write(
                    rest,
                    VmemNode {
                        size: node.size - size,
                        free: 1,
                        virt: node.virt + size,
                        next: node.next,
                        magic: VMEM_MAGIC,
                    },
                );
                node.size = size;
                node.next = rest.0;
                window.write(block, node);
            }
        }

        // Back and map every page of the range.
        let pages = node.size / PAGE_SIZE;
        let dir = paging.current();
        for i in 0..pages {
            let virt = VirtAddr(node.virt + i * PAGE_SIZE);
            let backed = match heap.alloc_page(window) {
                Some(frame) => {
                    match paging.map(window, heap, platform, dir, virt, frame, PageFlags::WRITABLE)
                    {
                        Ok(()) => true,
                        Err(_) => {
                            let _ = heap.free(window, frame);
                            false
                        }
                    }
                }
                None => false,
            };
            if !backed {
                warn!(target: "vmalloc", "backing allocation failed, rolling back {i} pages");
                for j in 0..i {
                    let virt = VirtAddr(node.virt + j * PAGE_SIZE);
                    if let Some(frame) = paging.translate(window, dir, virt) {
                        let _ = heap.free(window, frame.page_base());
                    }
                    paging.unmap(window, platform, dir, virt);
                }
                // The block was never marked allocated; fold a fresh split
                // back into its neighbor.
                let _ = self.coalesce(window, heap);
                return None;
            }
        }

        node.free = 0;
        window.write(block, node);
        self.stats.allocated_bytes += u64::from(node.size);
        Some(VirtAddr(node.virt))
    }

    /// Unmap and release every page of the range, mark it free and coalesce
    /// with free neighbors.
    pub fn free<P: Platform>(
        &mut self,
        window: &mut PhysWindow,
        heap: &mut Heap,
        paging: &Paging,
        platform: &mut P,
        ptr: VirtAddr,
    ) -> KernelResult<()> {
        let mut cursor = self.head;
        let block = loop {
            let node = self.node(window, cursor);
            if node.magic != VMEM_MAGIC {
                return Err(KernelError::HeapCorrupted { addr: cursor.0 });
            }
            if node.virt == ptr.0 && node.free == 0 {
                break cursor;
            }
            if node.next == 0 {
                warn!(target: "vmalloc", "free of unknown pointer {:#010x}", ptr.0);
                return Err(KernelError::InvalidAddress { addr: ptr.0 });
            }
            cursor = PhysAddr(node.next);
        };

        let mut node = self.node(window, block);
        let dir = paging.current();
        for i in 0..node.size / PAGE_SIZE {
            let virt = VirtAddr(node.virt + i * PAGE_SIZE);
            if let Some(frame) = paging.translate(window, dir, virt) {
                heap.free(window, frame.page_base())?;
                paging.unmap(window, platform, dir, virt);
            }
        }

        node.free = 1;
        window.write(block, node);
        self.stats.freed_bytes += u64::from(node.size);

        self.coalesce(window, heap)
    }

    /// Merge runs of virtually-adjacent free ranges, returning absorbed node
    /// records to the heap.
    fn coalesce(&mut self, window: &mut PhysWindow, heap: &mut Heap) -> KernelResult<()> {
        let mut cursor = self.head;
        loop {
            let mut node = self.node(window, cursor);
            if node.next == 0 {
                return Ok(());
            }
            let next_at = PhysAddr(node.next);
            let next = self.node(window, next_at);
            if node.free != 0 && next.free != 0 && node.virt + node.size == next.virt {
                node.size += next.size;
                node.next = next.next;
                window.write(cursor, node);
                heap.free(window, next_at)?;
            } else {
                cursor = next_at;
            }
        }
    }

    /// Size of the range starting at `ptr`, `None` when unknown.
    pub fn size_of(&self, window: &PhysWindow, ptr: VirtAddr) -> Option<u32> {
        let mut cursor = self.head;
        loop {
            let node = self.node(window, cursor);
            if node.virt == ptr.0 {
                return Some(node.size);
            }
            if node.next == 0 {
                return None;
            }
            cursor = PhysAddr(node.next);
        }
    }
}
