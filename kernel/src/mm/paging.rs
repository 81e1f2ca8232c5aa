//! Paging and address spaces
//!
//! Two-level page directories over the kernel window. The kernel directory
//! identity-maps the whole window; its present entries are shared by
//! reference into every process directory, so kernel pointers stay valid no
//! matter which directory is live. Directory and table storage are ordinary
//! page-aligned heap allocations, which the identity window makes
//! addressable by their physical address.
//!
//! A directory entry is process-private exactly when it is present and
//! differs from the kernel directory's entry at the same index; the clone
//! and release walkers rely on this to find per-process pages.

use log::info;

use super::heap::Heap;
use super::window::PhysWindow;
use super::{PageFlags, PhysAddr, VirtAddr, PAGE_ENTRIES, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::platform::Platform;

/// Paging state: the kernel directory and the currently loaded one.
pub struct Paging {
    kernel_dir: PhysAddr,
    current: PhysAddr,
}

fn entry(window: &PhysWindow, base: PhysAddr, index: usize) -> u32 {
    window.read(base.add(index as u32 * 4))
}

fn set_entry(window: &mut PhysWindow, base: PhysAddr, index: usize, value: u32) {
    window.write(base.add(index as u32 * 4), value);
}

impl Paging {
    /// Build the kernel directory, identity-map the window with
    /// present+writable leaves, and install it as current. Allocation
    /// failure here is failure to boot.
    pub fn init<P: Platform>(
        window: &mut PhysWindow,
        heap: &mut Heap,
        platform: &mut P,
    ) -> KernelResult<Self> {
        let kernel_dir = heap.alloc_page(window).ok_or(KernelError::OutOfMemory)?;
        window.fill_zero(kernel_dir, PAGE_SIZE);

        let flags = PageFlags::PRESENT | PageFlags::WRITABLE;
        let chunk = PAGE_ENTRIES * PAGE_SIZE; // span of one page table
        let tables = (window.size() + chunk - 1) / chunk;
        for dir_index in 0..tables {
            let table = heap.alloc_page(window).ok_or(KernelError::OutOfMemory)?;
            window.fill_zero(table, PAGE_SIZE);
            for i in 0..PAGE_ENTRIES {
                let phys = dir_index * chunk + i * PAGE_SIZE;
                if phys >= window.size() {
                    break;
                }
                set_entry(window, table, i as usize, phys | flags.bits());
            }
            set_entry(window, kernel_dir, dir_index as usize, table.0 | flags.bits());
        }

        platform.set_cr3(kernel_dir.0);
        info!(target: "paging", "identity mapped {} MiB kernel window, {} page tables", window.size() >> 20, tables);

        Ok(Self { kernel_dir, current: kernel_dir })
    }

    /// Set the CPU paging-enable bit over the installed directory.
    pub fn enable<P: Platform>(&self, platform: &mut P) {
        platform.set_cr3(self.current.0);
        platform.enable_paging();
        info!(target: "paging", "paging enabled");
    }

    /// The distinguished kernel directory.
    pub fn kernel_dir(&self) -> PhysAddr {
        self.kernel_dir
    }

    /// The directory currently loaded in the paging root register.
    pub fn current(&self) -> PhysAddr {
        self.current
    }

    /// Load `dir`, atomically replacing all non-kernel-window translations.
    pub fn switch_to<P: Platform>(&mut self, platform: &mut P, dir: PhysAddr) {
        self.current = dir;
        platform.set_cr3(dir.0);
    }

    /// Whether this directory index is part of the shared kernel window.
    fn is_kernel_index(&self, window: &PhysWindow, index: usize) -> bool {
        entry(window, self.kernel_dir, index) & PageFlags::PRESENT.bits() != 0
    }

    /// Allocate a directory and shallow-copy every present kernel entry.
    pub fn create_directory(&self, window: &mut PhysWindow, heap: &mut Heap) -> KernelResult<PhysAddr> {
        let dir = heap.alloc_page(window).ok_or(KernelError::OutOfMemory)?;
        window.fill_zero(dir, PAGE_SIZE);
        for i in 0..PAGE_ENTRIES as usize {
            let e = entry(window, self.kernel_dir, i);
            if e & PageFlags::PRESENT.bits() != 0 {
                set_entry(window, dir, i, e);
            }
        }
        Ok(dir)
    }

    /// Point `virt` at `phys` in `dir`, allocating the page table on demand.
    /// The table entry inherits the user bit of `flags`. Invalidates the TLB
    /// entry when `dir` is current.
    pub fn map<P: Platform>(
        &self,
        window: &mut PhysWindow,
        heap: &mut Heap,
        platform: &mut P,
        dir: PhysAddr,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageFlags,
    ) -> KernelResult<()> {
        let dir_index = virt.dir_index();
        let mut dir_entry = entry(window, dir, dir_index);
        if dir_entry & PageFlags::PRESENT.bits() == 0 {
            let table = heap.alloc_page(window).ok_or(KernelError::OutOfMemory)?;
            window.fill_zero(table, PAGE_SIZE);
            let table_flags =
                PageFlags::PRESENT | PageFlags::WRITABLE | (flags & PageFlags::USER);
            dir_entry = table.0 | table_flags.bits();
            set_entry(window, dir, dir_index, dir_entry);
        }

        let table = PhysAddr(dir_entry & !PageFlags::MASK);
        let leaf = phys.page_base().0 | (flags | PageFlags::PRESENT).bits();
        set_entry(window, table, virt.table_index(), leaf);

        if dir == self.current {
            platform.invalidate_tlb(virt.0);
        }
        Ok(())
    }

    /// Clear the leaf for `virt` in `dir`. Unmapping an absent address is a
    /// no-op.
    pub fn unmap<P: Platform>(
        &self,
        window: &mut PhysWindow,
        platform: &mut P,
        dir: PhysAddr,
        virt: VirtAddr,
    ) {
        let dir_entry = entry(window, dir, virt.dir_index());
        if dir_entry & PageFlags::PRESENT.bits() == 0 {
            return;
        }
        let table = PhysAddr(dir_entry & !PageFlags::MASK);
        set_entry(window, table, virt.table_index(), 0);
        if dir == self.current {
            platform.invalidate_tlb(virt.0);
        }
    }

    /// Walk both levels; `None` when either level is absent.
    pub fn translate(&self, window: &PhysWindow, dir: PhysAddr, virt: VirtAddr) -> Option<PhysAddr> {
        let dir_entry = entry(window, dir, virt.dir_index());
        if dir_entry & PageFlags::PRESENT.bits() == 0 {
            return None;
        }
        let table = PhysAddr(dir_entry & !PageFlags::MASK);
        let leaf = entry(window, table, virt.table_index());
        if leaf & PageFlags::PRESENT.bits() == 0 {
            return None;
        }
        Some(PhysAddr((leaf & !PageFlags::MASK) | virt.page_offset()))
    }

    /// Deep-copy `src`'s per-process mappings into a fresh directory: every
    /// private leaf gets a newly allocated frame with the source page's
    /// contents (no copy-on-write). On failure everything already built is
    /// released and the error propagates.
    pub fn clone_directory<P: Platform>(
        &self,
        window: &mut PhysWindow,
        heap: &mut Heap,
        platform: &mut P,
        src: PhysAddr,
    ) -> KernelResult<PhysAddr> {
        let dst = self.create_directory(window, heap)?;

        for dir_index in 0..PAGE_ENTRIES as usize {
            if self.is_kernel_index(window, dir_index) {
                continue;
            }
            let dir_entry = entry(window, src, dir_index);
            if dir_entry & PageFlags::PRESENT.bits() == 0 {
                continue;
            }
            let table = PhysAddr(dir_entry & !PageFlags::MASK);
            for table_index in 0..PAGE_ENTRIES as usize {
                let leaf = entry(window, table, table_index);
                if leaf & PageFlags::PRESENT.bits() == 0 {
                    continue;
                }
                let frame = match heap.alloc_page(window) {
                    Some(frame) => frame,
                    None => {
                        self.release_directory(window, heap, dst)?;
                        return Err(KernelError::OutOfMemory);
                    }
                };
                window.copy_page(frame, PhysAddr(leaf & !PageFlags::MASK));

                let virt =
                    VirtAddr(((dir_index as u32) << 22) | ((table_index as u32) << 12));
                let flags = PageFlags::from_bits_truncate(leaf & PageFlags::MASK);
                if let Err(err) = self.map(window, heap, platform, dst, virt, frame, flags) {
                    // The frame is not reachable from dst yet; drop it, then
                    // unwind the rest.
                    heap.free(window, frame)?;
                    self.release_directory(window, heap, dst)?;
                    return Err(err);
                }
            }
        }
        Ok(dst)
    }

    /// Free every per-process frame, then the private page tables, then the
    /// directory itself. Must refuse the kernel directory.
    pub fn release_directory(
        &self,
        window: &mut PhysWindow,
        heap: &mut Heap,
        dir: PhysAddr,
    ) -> KernelResult<()> {
        if dir == self.kernel_dir {
            return Err(KernelError::KernelDirectory);
        }

        for dir_index in 0..PAGE_ENTRIES as usize {
            if self.is_kernel_index(window, dir_index) {
                continue;
            }
            let dir_entry = entry(window, dir, dir_index);
            if dir_entry & PageFlags::PRESENT.bits() == 0 {
                continue;
            }
            let table = PhysAddr(dir_entry & !PageFlags::MASK);
            for table_index in 0..PAGE_ENTRIES as usize {
                let leaf = entry(window, table, table_index);
                if leaf & PageFlags::PRESENT.bits() != 0 {
                    heap.free(window, PhysAddr(leaf & !PageFlags::MASK))?;
                }
            }
            heap.free(window, table)?;
        }
        heap.free(window, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;

    const WINDOW: u32 = 0x0080_0000; // 8 MiB
    const HEAP_START: PhysAddr = PhysAddr(0x0010_0000);
    const HEAP_SIZE: u32 = 0x0060_0000;

    fn fixture() -> (PhysWindow, Heap, Paging, MockPlatform) {
        let mut window = PhysWindow::simulated(WINDOW);
        let mut heap = Heap::new(HEAP_START, HEAP_SIZE);
        heap.init(&mut window);
        let mut hw = MockPlatform::new();
        let paging = Paging::init(&mut window, &mut heap, &mut hw).unwrap();
        (window, heap, paging, hw)
    }

    #[test]
    fn kernel_window_is_identity_mapped() {
        let (window, _, paging, _) = fixture();
        for addr in [0u32, 0x1000, 0x0012_3000, WINDOW - PAGE_SIZE] {
            let got = paging.translate(&window, paging.kernel_dir(), VirtAddr(addr));
            assert_eq!(got, Some(PhysAddr(addr)));
        }
        // Beyond the window: unmapped.
        assert_eq!(paging.translate(&window, paging.kernel_dir(), VirtAddr(WINDOW)), None);
    }

    #[test]
    fn new_directory_shares_kernel_entries() {
        let (mut window, mut heap, paging, _) = fixture();
        let dir = paging.create_directory(&mut window, &mut heap).unwrap();
        for i in 0..PAGE_ENTRIES as usize {
            assert_eq!(entry(&window, dir, i), entry(&window, paging.kernel_dir(), i));
        }
        paging.release_directory(&mut window, &mut heap, dir).unwrap();
    }

    #[test]
    fn map_translate_unmap() {
        let (mut window, mut heap, paging, mut hw) = fixture();
        let dir = paging.create_directory(&mut window, &mut heap).unwrap();
        let frame = heap.alloc_page(&mut window).unwrap();
        let virt = VirtAddr(0x0804_8000);
        let flags = PageFlags::WRITABLE | PageFlags::USER;

        paging.map(&mut window, &mut heap, &mut hw, dir, virt, frame, flags).unwrap();
        assert_eq!(paging.translate(&window, dir, virt), Some(frame));
        assert_eq!(
            paging.translate(&window, dir, virt.add(0x7FF)),
            Some(frame.add(0x7FF))
        );

        paging.unmap(&mut window, &mut hw, dir, virt);
        assert_eq!(paging.translate(&window, dir, virt), None);

        // Unmapping an absent address is a no-op.
        paging.unmap(&mut window, &mut hw, dir, VirtAddr(0xDEAD_0000));

        heap.free(&mut window, frame).unwrap();
        paging.release_directory(&mut window, &mut heap, dir).unwrap();
    }

    #[test]
    fn tlb_shootdown_only_for_current_directory() {
        use crate::platform::HwEvent;

        let (mut window, mut heap, mut paging, mut hw) = fixture();
        let dir = paging.create_directory(&mut window, &mut heap).unwrap();
        let frame = heap.alloc_page(&mut window).unwrap();

        hw.events.clear();
        paging
            .map(&mut window, &mut heap, &mut hw, dir, VirtAddr(0x0804_8000), frame, PageFlags::WRITABLE)
            .unwrap();
        // dir is not current: no invalidation recorded.
        assert!(!hw.events.iter().any(|e| matches!(e, HwEvent::TlbInvalidate(_))));

        paging.switch_to(&mut hw, dir);
        hw.events.clear();
        paging
            .map(&mut window, &mut heap, &mut hw, dir, VirtAddr(0x0804_9000), frame, PageFlags::WRITABLE)
            .unwrap();
        assert!(hw.events.contains(&HwEvent::TlbInvalidate(0x0804_9000)));
    }

    #[test]
    fn clone_copies_content_into_fresh_frames() {
        let (mut window, mut heap, paging, mut hw) = fixture();
        let src = paging.create_directory(&mut window, &mut heap).unwrap();
        let frame = heap.alloc_page(&mut window).unwrap();
        let virt = VirtAddr(0x0806_0000);
        paging
            .map(&mut window, &mut heap, &mut hw, src, virt, frame, PageFlags::WRITABLE | PageFlags::USER)
            .unwrap();
        window.write_bytes(frame, b"process state");

        let dst = paging.clone_directory(&mut window, &mut heap, &mut hw, src).unwrap();
        let copy = paging.translate(&window, dst, virt).unwrap();
        assert_ne!(copy, frame, "clone must not share frames");
        let mut buf = [0u8; 13];
        window.read_bytes(copy, &mut buf);
        assert_eq!(&buf, b"process state");

        paging.release_directory(&mut window, &mut heap, dst).unwrap();
        heap.free(&mut window, frame).unwrap();
        paging.release_directory(&mut window, &mut heap, src).unwrap();
    }

    #[test]
    fn release_returns_all_heap_space() {
        let (mut window, mut heap, paging, mut hw) = fixture();
        let before = heap.stats().used_bytes();

        let dir = paging.create_directory(&mut window, &mut heap).unwrap();
        for i in 0..4u32 {
            let frame = heap.alloc_page(&mut window).unwrap();
            paging
                .map(
                    &mut window,
                    &mut heap,
                    &mut hw,
                    dir,
                    VirtAddr(0x0808_0000 + i * PAGE_SIZE),
                    frame,
                    PageFlags::WRITABLE,
                )
                .unwrap();
        }
        assert!(heap.stats().used_bytes() > before);

        paging.release_directory(&mut window, &mut heap, dir).unwrap();
        assert_eq!(heap.stats().used_bytes(), before);
    }

    #[test]
    fn kernel_directory_is_protected() {
        let (mut window, mut heap, paging, _) = fixture();
        let err = paging.release_directory(&mut window, &mut heap, paging.kernel_dir());
        assert_eq!(err, Err(KernelError::KernelDirectory));
    }
}
