//! DMA-visible memory regions and address translation.
//!
//! Queue rings and receive buffers are shared with the adapter. A
//! [`DmaRegion`] carries both the CPU pointer and the bus address the
//! adapter uses. Regions are either borrowed from an external allocator
//! ([`DmaRegion::from_raw_parts`]) or owned heap allocations
//! ([`DmaRegion::alloc`]) whose bus address is the virtual address, which
//! holds under an identity-mapped IOMMU and in the hardware simulator.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

/// Translates CPU virtual addresses of I/O buffers into bus addresses.
pub trait AddressTranslator {
    /// Bus address of `vaddr`, or `None` if the range is not mapped.
    fn translate(&self, vaddr: u64, len: usize) -> Option<u64>;
}

/// Translator for identity-mapped memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslator;

impl AddressTranslator for IdentityTranslator {
    fn translate(&self, vaddr: u64, _len: usize) -> Option<u64> {
        Some(vaddr)
    }
}

/// Contiguous DMA memory.
pub struct DmaRegion {
    virt: NonNull<u8>,
    phys: u64,
    len: usize,
    /// Set when this region owns its allocation.
    layout: Option<Layout>,
}

impl std::fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaRegion")
            .field("virt", &self.virt)
            .field("phys", &format_args!("{:#x}", self.phys))
            .field("len", &self.len)
            .finish()
    }
}

impl DmaRegion {
    /// Allocate zeroed, `align`-aligned memory with an identity bus address.
    ///
    /// Returns `None` for a zero length, a bad alignment or allocation failure.
    pub fn alloc(len: usize, align: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let layout = Layout::from_size_align(len, align).ok()?;
        let virt = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self {
            virt,
            phys: virt.as_ptr() as u64,
            len,
            layout: Some(layout),
        })
    }

    /// Wrap memory owned by an external DMA allocator.
    ///
    /// # Safety
    /// `virt` must point to `len` bytes that stay valid and are not accessed
    /// through other Rust references for the lifetime of the region, and
    /// `phys` must be the bus address of `virt`.
    pub unsafe fn from_raw_parts(virt: NonNull<u8>, phys: u64, len: usize) -> Self {
        Self {
            virt,
            phys,
            len,
            layout: None,
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.virt.as_ptr()
    }

    #[inline]
    pub fn phys(&self) -> u64 {
        self.phys
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.virt.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.virt.as_ptr(), self.len) }
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            unsafe { dealloc(self.virt.as_ptr(), layout) };
        }
    }
}
