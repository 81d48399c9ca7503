// Earth GPU Constants - SINGLE SOURCE OF TRUTH
//
// This file contains the numeric defaults shared by the GPU layer, the
// configuration defaults and the tests.
//
// CRITICAL: Do NOT redefine these values anywhere else in the codebase!

/// Frame pacing
pub mod frame {
    /// Number of frames the CPU may record ahead of the GPU.
    /// Every per-frame array in the video device has exactly this length.
    pub const FRAMES_IN_FLIGHT: usize = 2;

    /// Hard limit on a single fence wait before the device is considered lost (ms)
    pub const FENCE_TIMEOUT_MS: u64 = 10_000_000;
}

/// Descriptor heap capacities
pub mod heaps {
    pub const RTV_HEAP_CAPACITY: u32 = 2048;
    pub const DSV_HEAP_CAPACITY: u32 = 2048;
    /// Shader-visible CBV/SRV/UAV heap
    pub const SHADER_HEAP_CAPACITY: u32 = 1_000_000;
    /// Shader-visible sampler heap
    pub const SAMPLER_HEAP_CAPACITY: u32 = 1024;
}

/// Copy and placement alignment rules
pub mod alignment {
    /// Row pitch alignment for buffer <-> texture copies
    pub const TEXTURE_ROW_PITCH_ALIGNMENT: u64 = 256;
    /// Offset alignment of each subresource inside a staging buffer
    pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;
    /// Constant buffer views are sized in multiples of this
    pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

    #[inline]
    pub const fn align_up(value: u64, alignment: u64) -> u64 {
        (value + alignment - 1) / alignment * alignment
    }
}

/// Texture subresource selection
pub mod textures {
    /// Raw mip value meaning "every mip level"
    pub const ALL_MIPS: u32 = 0xFFFF;
}

/// On-disk caches
pub mod cache {
    /// Seed used when hashing source paths into cache file names
    pub const CACHE_HASH_SEED: u64 = 1000;
    pub const DEFAULT_CACHE_DIR: &str = ".cache";
    pub const SHADER_CACHE_EXTENSION: &str = "wns";
    pub const TEXTURE_CACHE_EXTENSION: &str = "wnt";
    /// Minimum time between two modification checks of a watched file (seconds)
    pub const SHADER_POLL_INTERVAL_SECS: f64 = 0.5;
}
