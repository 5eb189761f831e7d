//! Memory barrier macros for SLI-4 queue and doorbell access.
//!
//! Queue memory is shared with the adapter through DMA; doorbells are MMIO
//! registers. These macros order CPU accesses against the device.

/// Full write barrier before an MMIO doorbell write.
///
/// Every store to queue memory (WQE bodies, RQ buffer addresses, cleared
/// valid bits) must be globally visible before the adapter observes the
/// doorbell.
macro_rules! doorbell_wmb {
    () => {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            std::arch::x86_64::_mm_sfence();
        }
        #[cfg(target_arch = "x86")]
        unsafe {
            std::arch::x86::_mm_sfence();
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            std::arch::asm!("dsb st", options(nostack, preserves_flags));
        }
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    };
}

/// Load barrier for device reads.
///
/// Used after observing a valid bit so the rest of the entry is read after
/// the adapter finished writing it. On x86/x86_64 this is a compiler barrier
/// only (TSO keeps load-load order).
macro_rules! udma_from_device_barrier {
    () => {
        #[cfg(target_arch = "aarch64")]
        unsafe {
            std::arch::asm!("dmb ld", options(nostack, preserves_flags));
        }
        #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
        {
            std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::Acquire);
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
        {
            std::sync::atomic::fence(std::sync::atomic::Ordering::Acquire);
        }
    };
}
