/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Mask for extracting page offset
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Default huge page size (2 MB), used when `/proc/meminfo` gives none
pub const HUGEPAGE_SIZE: usize = 1 << 21;

/// Cache line size (64 bytes) for x86_64
pub const CL_SIZE: usize = 64;

/// Longest message (in characters) the receiver buffers before discarding
pub const MAX_MESSAGE_LEN: usize = 128;

/// Default sender-side benchmark log
pub const SENDER_LOG: &str = "data/senderSave";
/// Default receiver-side benchmark log
pub const RECEIVER_LOG: &str = "data/receiverSave";
