//! Stack arena configuration

/// Configuration for [`StackAllocator`](super::StackAllocator).
#[derive(Debug, Clone, Copy)]
pub struct StackConfig {
    /// Maintain operation counters under the arena lock.
    pub track_stats: bool,

    /// Byte written over freshly allocated ranges, for spotting reads of
    /// uninitialized memory.
    pub alloc_pattern: Option<u8>,

    /// Byte written over ranges reclaimed at the tip, for spotting
    /// use-after-free.
    pub dealloc_pattern: Option<u8>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            track_stats: cfg!(debug_assertions),
            alloc_pattern: if cfg!(debug_assertions) { Some(0xCC) } else { None },
            dealloc_pattern: if cfg!(debug_assertions) { Some(0xDD) } else { None },
        }
    }
}

impl StackConfig {
    /// No counters, no fill patterns.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Counters and fill patterns on.
    #[must_use]
    pub const fn debug() -> Self {
        Self {
            track_stats: true,
            alloc_pattern: Some(0xCC),
            dealloc_pattern: Some(0xDD),
        }
    }
}
