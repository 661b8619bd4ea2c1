use crate::{RuntimeError, RuntimeResult};

/// Block distribution of `[0, N)` over the participating processes.
///
/// The first `N mod P` ranks hold `⌈N/P⌉` elements, the rest `⌊N/P⌋`; the
/// inclusive per-rank ranges are disjoint, ordered by rank, and cover exactly
/// `[0, N)`. Construction and the arithmetic owner lookup both live here so
/// the rule cannot drift between call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    ranges: Vec<(usize, usize)>,
    elems: usize,
}

impl PartitionTable {
    pub fn block(elems: usize, procs: usize) -> RuntimeResult<Self> {
        if procs == 0 || procs > elems {
            return Err(RuntimeError::OverPartitioned { elems, procs });
        }
        let base = elems / procs;
        let rem = elems % procs;
        let mut ranges = Vec::with_capacity(procs);
        let mut first = 0;
        for rank in 0..procs {
            let len = base + usize::from(rank < rem);
            ranges.push((first, first + len - 1));
            first += len;
        }
        Ok(Self { ranges, elems })
    }

    /// Inclusive global-index range physically stored by `rank`.
    #[inline]
    pub fn range_of(&self, rank: i32) -> (usize, usize) {
        self.ranges[rank as usize]
    }

    /// Number of elements stored by `rank`.
    #[inline]
    pub fn len_of(&self, rank: i32) -> usize {
        let (first, last) = self.range_of(rank);
        last - first + 1
    }

    /// Owner rank and displacement into its partition, computed from the
    /// distribution rule rather than by scanning the table.
    pub fn owner_of(&self, index: usize) -> Option<(i32, usize)> {
        if index >= self.elems {
            return None;
        }
        let procs = self.ranges.len();
        let base = self.elems / procs;
        let rem = self.elems % procs;
        let head = rem * (base + 1);
        if index < head {
            Some(((index / (base + 1)) as i32, index % (base + 1)))
        } else {
            let tail = index - head;
            Some(((rem + tail / base) as i32, tail % base))
        }
    }
}
