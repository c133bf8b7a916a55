//! Binned spatial index answering "which box owns this cell?".
//!
//! Uses sorted-index + bin-offset arrays rather than `HashMap` so that
//! building is a pair of wait-free atomic counting passes and queries are
//! pure reads, safe to issue from many parallel workers at once.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::boxes::{BoxArray, IndexBox, IntVect};

/// Spatial index over a box decomposition.
///
/// A uniform bin grid covers the bounding box of all boxes, with the bin
/// size set to the maximum per-axis box extent so that any box fits within
/// roughly one bin. Each box is filed under the bin containing its lower
/// corner; queries therefore scan the 3x3x3 bin neighborhood, because a
/// box whose lower corner sits in an adjacent bin can still cover the
/// query cell.
///
/// Built once per decomposition topology and reused across redistribution
/// cycles until the topology changes (e.g. after regridding).
pub struct BoxLocator {
    boxes: Vec<IndexBox>,
    bins_lo: IntVect,
    bin_size: IntVect,
    dims: IntVect,
    /// CSR-style start offset per bin; length `num_bins + 1`.
    offsets: Vec<u32>,
    /// Box ids sorted by bin.
    permutation: Vec<u32>,
}

impl BoxLocator {
    /// Build the index for a box decomposition.
    pub fn build(ba: &BoxArray) -> Self {
        assert!(!ba.is_empty(), "cannot build a locator over zero boxes");
        let boxes: Vec<IndexBox> = ba.as_slice().to_vec();

        // Global bounds and the maximum box extent per axis.
        let (bins_lo, bins_hi, max_extent) = boxes
            .par_iter()
            .map(|b| (b.lo(), b.hi(), b.length()))
            .reduce(
                || ([i32::MAX; 3], [i32::MIN; 3], [i32::MIN; 3]),
                |(alo, ahi, aext), (blo, bhi, bext)| {
                    let mut lo = alo;
                    let mut hi = ahi;
                    let mut ext = aext;
                    for d in 0..3 {
                        lo[d] = lo[d].min(blo[d]);
                        hi[d] = hi[d].max(bhi[d]);
                        ext[d] = ext[d].max(bext[d]);
                    }
                    (lo, hi, ext)
                },
            );

        let bin_size = [
            max_extent[0].max(1),
            max_extent[1].max(1),
            max_extent[2].max(1),
        ];
        let dims = [
            (bins_hi[0] - bins_lo[0]) / bin_size[0] + 1,
            (bins_hi[1] - bins_lo[1]) / bin_size[1] + 1,
            (bins_hi[2] - bins_lo[2]) / bin_size[2] + 1,
        ];
        let num_bins = dims[0] as usize * dims[1] as usize * dims[2] as usize;

        // --- 1. Count boxes per bin (atomic increments) ---
        let counts: Vec<AtomicU32> = (0..num_bins).map(|_| AtomicU32::new(0)).collect();
        let cells: Vec<u32> = boxes
            .par_iter()
            .map(|b| {
                let bin = flat_bin(bin_of(b.lo(), bins_lo, bin_size, dims), dims);
                counts[bin as usize].fetch_add(1, Ordering::Relaxed);
                bin
            })
            .collect();

        // --- 2. Exclusive prefix sum into CSR offsets ---
        let mut offsets = vec![0u32; num_bins + 1];
        let mut running = 0u32;
        for (bin, count) in counts.iter().enumerate() {
            offsets[bin] = running;
            running += count.load(Ordering::Relaxed);
        }
        offsets[num_bins] = running;

        // --- 3. Scatter box ids into their bin slots (atomic write heads) ---
        let heads: Vec<AtomicU32> = offsets[..num_bins]
            .iter()
            .map(|&o| AtomicU32::new(o))
            .collect();
        let permutation: Vec<AtomicU32> =
            (0..boxes.len()).map(|_| AtomicU32::new(0)).collect();
        cells.par_iter().enumerate().for_each(|(i, &bin)| {
            let slot = heads[bin as usize].fetch_add(1, Ordering::Relaxed);
            permutation[slot as usize].store(i as u32, Ordering::Relaxed);
        });
        let permutation: Vec<u32> = permutation
            .into_iter()
            .map(AtomicU32::into_inner)
            .collect();

        tracing::debug!(
            "Locator built: {} boxes, {}x{}x{} bins, bin size {:?}",
            boxes.len(),
            dims[0],
            dims[1],
            dims[2],
            bin_size
        );

        Self {
            boxes,
            bins_lo,
            bin_size,
            dims,
            offsets,
            permutation,
        }
    }

    /// Find the box owning the given cell.
    ///
    /// Returns `None` when no box contains the cell -- a normal outcome for
    /// points outside the domain or inside a hole, not an error.
    pub fn locate(&self, iv: IntVect) -> Option<usize> {
        let center = bin_of(iv, self.bins_lo, self.bin_size, self.dims);
        for dx in -1..=1i32 {
            let bx = center[0] + dx;
            if bx < 0 || bx >= self.dims[0] {
                continue;
            }
            for dy in -1..=1i32 {
                let by = center[1] + dy;
                if by < 0 || by >= self.dims[1] {
                    continue;
                }
                for dz in -1..=1i32 {
                    let bz = center[2] + dz;
                    if bz < 0 || bz >= self.dims[2] {
                        continue;
                    }
                    let bin = flat_bin([bx, by, bz], self.dims) as usize;
                    for p in self.offsets[bin]..self.offsets[bin + 1] {
                        let gid = self.permutation[p as usize] as usize;
                        if self.boxes[gid].contains(iv) {
                            return Some(gid);
                        }
                    }
                }
            }
        }
        None
    }

    /// Number of boxes covered by the index.
    pub fn num_boxes(&self) -> usize {
        self.boxes.len()
    }
}

/// Bin coordinates of a cell, clamped into the valid bin range.
#[inline]
fn bin_of(iv: IntVect, bins_lo: IntVect, bin_size: IntVect, dims: IntVect) -> IntVect {
    let mut bin = [0i32; 3];
    for d in 0..3 {
        let b = (iv[d] - bins_lo[d]).div_euclid(bin_size[d]);
        bin[d] = b.clamp(0, dims[d] - 1);
    }
    bin
}

#[inline]
fn flat_bin(bin: IntVect, dims: IntVect) -> u32 {
    ((bin[0] * dims[1] + bin[1]) * dims[2] + bin[2]) as u32
}
