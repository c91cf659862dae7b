//! Hardware capability model
//!
//! A static, read-only description of the GPU target: warp width, thread
//! budget, vector load width, and the presence of warp shuffles and of a
//! specialized matrix-multiply unit. The model is an explicit value threaded
//! through every synthesis call; there is no ambient default target, so
//! entry points aimed at different targets can be processed side by side.

use serde::{Deserialize, Serialize};

/// Threads per warp.
pub const WARP_SIZE: i64 = 32;

/// Maximum threads per block.
pub const MAX_THREADS_PER_BLOCK: i64 = 1024;

/// Widest vector load, in bits.
pub const MAX_VECTOR_LOAD_BITS: i64 = 128;

/// GPU capability description
///
/// Pure data: no methods beyond field access and two scaling helpers that
/// depend only on the fixed warp geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuModel {
    /// Target name, e.g. "sm_80"
    pub name: String,

    /// Warp-level shuffle instructions are available
    pub has_warp_shuffle: bool,

    /// A specialized matrix-multiply unit is available
    pub has_mma_unit: bool,
}

impl Default for GpuModel {
    fn default() -> Self {
        Self {
            name: "default-gpu".to_string(),
            has_warp_shuffle: false,
            has_mma_unit: false,
        }
    }
}

impl GpuModel {
    pub fn new(name: impl Into<String>, has_warp_shuffle: bool, has_mma_unit: bool) -> Self {
        Self {
            name: name.into(),
            has_warp_shuffle,
            has_mma_unit,
        }
    }

    /// Widest vector load for elements of the given bit width, in elements.
    pub fn max_vector_width(&self, bit_width: i64) -> i64 {
        (MAX_VECTOR_LOAD_BITS / bit_width).max(1)
    }
}

/// Return `max(1, value * 32 / bit_width)`.
///
/// Counts expressed in 32-bit words are rescaled to elements of a narrower or
/// wider type.
pub fn scale_up_by_bit_width(value: i64, bit_width: i64) -> i64 {
    debug_assert!(bit_width > 0);
    (value * 32 / bit_width).max(1)
}

/// Adjust the warp count used by a block-level shuffle so that several
/// narrow elements pack into one 32-bit shuffled word.
///
/// The packing factor is the largest power of two `<= 32 / bit_width` that
/// divides `num_warps`; the result is capped at 4 warps, the point where a
/// full 128-bit shuffled element is formed.
pub fn adjust_num_warps_for_block_shuffle(num_warps: i64, bit_width: i64) -> i64 {
    debug_assert!(bit_width > 0 && bit_width.count_ones() == 1);
    let mut factor = scale_up_by_bit_width(1, bit_width);
    while factor > 1 && num_warps % factor != 0 {
        factor >>= 1;
    }
    (num_warps / factor).min(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_up_by_bit_width() {
        assert_eq!(scale_up_by_bit_width(4, 32), 4);
        assert_eq!(scale_up_by_bit_width(4, 16), 8);
        assert_eq!(scale_up_by_bit_width(4, 8), 16);
        assert_eq!(scale_up_by_bit_width(1, 64), 1);
    }

    #[test]
    fn test_adjust_num_warps() {
        // 32b elements: no packing, capped at 4.
        assert_eq!(adjust_num_warps_for_block_shuffle(8, 32), 4);
        assert_eq!(adjust_num_warps_for_block_shuffle(2, 32), 2);
        // 16b elements pack two per word.
        assert_eq!(adjust_num_warps_for_block_shuffle(8, 16), 4);
        assert_eq!(adjust_num_warps_for_block_shuffle(4, 16), 2);
        // Odd warp counts cannot be packed.
        assert_eq!(adjust_num_warps_for_block_shuffle(3, 16), 3);
    }

    #[test]
    fn test_max_vector_width() {
        let model = GpuModel::default();
        assert_eq!(model.max_vector_width(32), 4);
        assert_eq!(model.max_vector_width(16), 8);
        assert_eq!(model.max_vector_width(64), 2);
    }
}
