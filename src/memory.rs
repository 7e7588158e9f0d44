//! Buffer descriptors.
//!
//! A `MemoryDesc` describes a blocked-strided layout: per-dimension outer
//! strides (in elements) plus an optional single inner block. Plain row-major
//! buffers are the degenerate case with no inner block.

use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDesc {
    pub dims: Vec<usize>,
    /// `dims` rounded up to the inner block.
    pub padded_dims: Vec<usize>,
    pub data_type: DataType,
    /// Elements between the buffer start and the first element.
    pub offset0: usize,
    /// Outer strides in elements, one per dimension.
    pub strides: Vec<usize>,
    pub inner_blks: Vec<usize>,
    pub inner_idxs: Vec<usize>,
}

impl MemoryDesc {
    /// Dense row-major layout.
    pub fn plain(dims: &[usize], data_type: DataType) -> Self {
        let mut strides = vec![1; dims.len()];
        for d in (0..dims.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * dims[d + 1];
        }
        Self::strided(dims, &strides, data_type)
    }

    /// Arbitrary outer strides, no blocking.
    ///
    /// # Panics
    ///
    /// Panics if `strides` and `dims` differ in length.
    pub fn strided(dims: &[usize], strides: &[usize], data_type: DataType) -> Self {
        assert_eq!(dims.len(), strides.len(), "one stride per dimension");
        MemoryDesc {
            dims: dims.to_vec(),
            padded_dims: dims.to_vec(),
            data_type,
            offset0: 0,
            strides: strides.to_vec(),
            inner_blks: Vec::new(),
            inner_idxs: Vec::new(),
        }
    }

    /// Dense layout with dimension `block_dim` split into an innermost block
    /// of `block` elements (e.g. `nChw8c`). The blocked dimension is padded
    /// up to a multiple of `block`.
    ///
    /// # Panics
    ///
    /// Panics if `block_dim` is not a dimension of `dims` or `block` is zero.
    pub fn blocked(dims: &[usize], data_type: DataType, block_dim: usize, block: usize) -> Self {
        assert!(block_dim < dims.len(), "block_dim out of range");
        assert!(block > 0, "block must be positive");
        let mut padded_dims = dims.to_vec();
        padded_dims[block_dim] = padded_dims[block_dim].div_ceil(block) * block;

        let outer: Vec<usize> = padded_dims
            .iter()
            .enumerate()
            .map(|(d, &p)| if d == block_dim { p / block } else { p })
            .collect();
        let mut strides = vec![block; dims.len()];
        for d in (0..dims.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * outer[d + 1];
        }

        MemoryDesc {
            dims: dims.to_vec(),
            padded_dims,
            data_type,
            offset0: 0,
            strides,
            inner_blks: vec![block],
            inner_idxs: vec![block_dim],
        }
    }

    pub fn with_offset0(mut self, offset0: usize) -> Self {
        self.offset0 = offset0;
        self
    }

    #[inline]
    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    /// Element count, counting padding when `with_padding`.
    pub fn nelems(&self, with_padding: bool) -> usize {
        if self.has_zero_dim() {
            return 0;
        }
        let dims = if with_padding { &self.padded_dims } else { &self.dims };
        dims.iter().product()
    }

    pub fn has_zero_dim(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    /// Per-dimension inner block size (1 when not blocked).
    fn blocks(&self) -> Vec<usize> {
        let mut blocks = vec![1; self.ndims()];
        for (&b, &i) in self.inner_blks.iter().zip(&self.inner_idxs) {
            blocks[i] *= b;
        }
        blocks
    }

    /// Bytes spanned from the first element, excluding `offset0`.
    pub fn size_bytes(&self) -> usize {
        if self.ndims() == 0 || self.has_zero_dim() {
            return 0;
        }
        let blocks = self.blocks();
        let mut max_size = (0..self.ndims())
            .map(|d| self.padded_dims[d] / blocks[d] * self.strides[d])
            .max()
            .unwrap_or(0);
        if max_size == 1 && !self.inner_blks.is_empty() {
            max_size = self.inner_blks.iter().product();
        }
        max_size * self.data_type.size_bytes()
    }

    /// No gaps between elements. With `with_padding = false` the padding of
    /// a blocked dimension counts as a gap.
    pub fn is_dense(&self, with_padding: bool) -> bool {
        self.nelems(with_padding) * self.data_type.size_bytes() == self.size_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_is_dense() {
        let md = MemoryDesc::plain(&[2, 3, 5], DataType::F32);
        assert_eq!(md.strides, vec![15, 5, 1]);
        assert_eq!(md.nelems(false), 30);
        assert_eq!(md.size_bytes(), 120);
        assert!(md.is_dense(false));
        assert!(md.is_dense(true));
    }

    #[test]
    #[should_panic(expected = "one stride per dimension")]
    fn test_strided_rank_mismatch_panics() {
        MemoryDesc::strided(&[4, 3], &[1], DataType::F32);
    }

    #[test]
    #[should_panic(expected = "block_dim out of range")]
    fn test_blocked_dim_out_of_range_panics() {
        MemoryDesc::blocked(&[2, 3], DataType::F32, 2, 8);
    }

    #[test]
    #[should_panic(expected = "block must be positive")]
    fn test_blocked_zero_block_panics() {
        MemoryDesc::blocked(&[2, 3], DataType::F32, 1, 0);
    }

    #[test]
    fn test_strided_is_not_dense() {
        let md = MemoryDesc::strided(&[4, 3], &[6, 2], DataType::Bf16);
        assert_eq!(md.size_bytes(), 4 * 6 * 2);
        assert!(!md.is_dense(true));
    }

    #[test]
    fn test_blocked_dense_only_with_padding() {
        // N=1, C=3, H=2 with C blocked by 8
        let md = MemoryDesc::blocked(&[1, 3, 2], DataType::F32, 1, 8);
        assert_eq!(md.padded_dims, vec![1, 8, 2]);
        assert_eq!(md.strides, vec![16, 16, 8]);
        assert_eq!(md.nelems(true), 16);
        assert_eq!(md.nelems(false), 6);
        assert!(md.is_dense(true));
        assert!(!md.is_dense(false));
    }

    #[test]
    fn test_blocked_exact_multiple_is_dense() {
        let md = MemoryDesc::blocked(&[2, 16, 3], DataType::F16, 1, 8);
        assert!(md.is_dense(false));
        assert_eq!(md.size_bytes(), 2 * 16 * 3 * 2);
    }

    #[test]
    fn test_zero_dim() {
        let md = MemoryDesc::plain(&[4, 0, 2], DataType::F32);
        assert!(md.has_zero_dim());
        assert_eq!(md.nelems(true), 0);
        assert_eq!(md.size_bytes(), 0);
    }

    #[test]
    fn test_offset_changes_equality() {
        let a = MemoryDesc::plain(&[8], DataType::F32);
        let b = a.clone().with_offset0(4);
        assert_ne!(a, b);
        assert_eq!(a.size_bytes(), b.size_bytes());
    }
}
