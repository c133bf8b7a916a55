//! Box ownership and the rank-grouped bucket permutation.
//!
//! The distribution map records which rank owns each box; box assignment
//! is an input here, never computed. The buffer map reorders box ids into
//! *buckets* grouped contiguously by owning rank, which is what makes
//! per-rank send buffer ranges contiguous during redistribution.

/// Box id to owning rank assignment.
#[derive(Debug, Clone)]
pub struct DistributionMap {
    owner: Vec<usize>,
    num_ranks: usize,
}

impl DistributionMap {
    /// Create a distribution map from a per-box owner list.
    pub fn new(owner: Vec<usize>, num_ranks: usize) -> Self {
        assert!(num_ranks > 0, "distribution requires at least one rank");
        for (gid, &r) in owner.iter().enumerate() {
            assert!(
                r < num_ranks,
                "box {} assigned to rank {} but only {} ranks exist",
                gid,
                r,
                num_ranks
            );
        }
        Self { owner, num_ranks }
    }

    /// Owning rank of the given box.
    #[inline]
    pub fn owner(&self, gid: usize) -> usize {
        self.owner[gid]
    }

    /// Number of boxes covered by the map.
    pub fn len(&self) -> usize {
        self.owner.len()
    }

    /// Return `true` if the map covers no boxes.
    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }

    /// Number of ranks participating in the decomposition.
    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// Box ids owned by the given rank, in id order.
    pub fn boxes_on_rank(&self, rank: usize) -> Vec<usize> {
        (0..self.owner.len())
            .filter(|&g| self.owner[g] == rank)
            .collect()
    }
}

/// Box-to-bucket permutation grouping buckets contiguously by owning rank.
///
/// A *bucket* is the position of a box in the global ordering sorted by
/// (owning rank, box id). Every rank computes the identical permutation,
/// so the bucket-indexed layout of a send buffer is valid everywhere.
#[derive(Debug, Clone)]
pub struct BufferMap {
    box_to_bucket: Vec<usize>,
    bucket_to_box: Vec<usize>,
    /// First bucket of each rank; length `num_ranks + 1`.
    rank_offsets: Vec<usize>,
}

impl BufferMap {
    /// Build the bucket permutation for a distribution map.
    pub fn new(dmap: &DistributionMap) -> Self {
        let n = dmap.len();
        let mut bucket_to_box: Vec<usize> = (0..n).collect();
        bucket_to_box.sort_by_key(|&g| (dmap.owner(g), g));

        let mut box_to_bucket = vec![0usize; n];
        for (bucket, &gid) in bucket_to_box.iter().enumerate() {
            box_to_bucket[gid] = bucket;
        }

        let mut rank_offsets = vec![0usize; dmap.num_ranks() + 1];
        for gid in 0..n {
            rank_offsets[dmap.owner(gid) + 1] += 1;
        }
        for r in 0..dmap.num_ranks() {
            rank_offsets[r + 1] += rank_offsets[r];
        }

        Self {
            box_to_bucket,
            bucket_to_box,
            rank_offsets,
        }
    }

    /// Bucket holding the given box.
    #[inline]
    pub fn bucket(&self, gid: usize) -> usize {
        self.box_to_bucket[gid]
    }

    /// Box id stored in the given bucket.
    #[inline]
    pub fn box_of_bucket(&self, bucket: usize) -> usize {
        self.bucket_to_box[bucket]
    }

    /// Total number of buckets (equals the number of boxes).
    pub fn num_buckets(&self) -> usize {
        self.bucket_to_box.len()
    }

    /// Contiguous bucket range owned by the given rank.
    #[inline]
    pub fn bucket_range(&self, rank: usize) -> std::ops::Range<usize> {
        self.rank_offsets[rank]..self.rank_offsets[rank + 1]
    }

    /// First bucket owned by the given rank.
    #[inline]
    pub fn first_bucket_on_rank(&self, rank: usize) -> usize {
        self.rank_offsets[rank]
    }
}
