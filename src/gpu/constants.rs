//! GPU constants - Single source of truth for the GPU layer
//!
//! This module re-exports constants from the root constants.rs file so the
//! rest of the crate never hard-codes heap sizes, alignments or frame counts.

// Import constants from single source of truth
include!("../../constants.rs");

pub use self::alignment::*;
pub use self::cache::*;
pub use self::frame::*;
pub use self::heaps::*;
pub use self::textures::*;

#[cfg(test)]
mod constant_checks {
    use super::*;

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 512), 512);
    }

    #[test]
    fn frame_count_is_double_buffered() {
        assert_eq!(FRAMES_IN_FLIGHT, 2);
    }
}
