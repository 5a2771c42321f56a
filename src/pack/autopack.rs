//! Autopack Planner
//!
//! Decides which packs to merge so that the pack count stays bounded by the
//! digit sum of the revision count, without ever reorganizing everything.
//!
//! ## Example
//! ```text
//! total revisions: 1234
//! max packs:       1 + 2 + 3 + 4 = 10
//! distribution:    [1000, 100, 100, 10, 10, 10, 1, 1, 1, 1]
//! ```
//!
//! Everything here is pure: no I/O, same input → same plan.

use std::collections::VecDeque;

/// A pack as the planner sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub name: String,
    pub revision_count: u64,
}

impl PackSummary {
    pub fn new(name: impl Into<String>, revision_count: u64) -> Self {
        Self {
            name: name.into(),
            revision_count,
        }
    }
}

/// Packs to merge into one new pack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackOperation {
    /// Sum of the revision counts of `packs`
    pub revision_count: u64,
    pub packs: Vec<String>,
}

/// Maximum number of packs allowed for `total_revisions`
///
/// The sum of the decimal digits; 0 revisions still allow one pack.
pub fn max_pack_count(total_revisions: u64) -> usize {
    if total_revisions == 0 {
        return 1;
    }
    let mut remaining = total_revisions;
    let mut sum = 0usize;
    while remaining > 0 {
        sum += (remaining % 10) as usize;
        remaining /= 10;
    }
    sum
}

/// Target revision count of each pack, largest first
///
/// Each decimal digit `d` at weight `10^k` contributes `d` buckets of size
/// `10^k`. 0 revisions → `[0]`.
pub fn pack_distribution(total_revisions: u64) -> Vec<u64> {
    if total_revisions == 0 {
        return vec![0];
    }
    let mut result = Vec::new();
    let mut remaining = total_revisions;
    let mut size = 1u64;
    while remaining > 0 {
        let digit = remaining % 10;
        for _ in 0..digit {
            result.push(size);
        }
        remaining /= 10;
        size = size.saturating_mul(10);
    }
    result.reverse();
    result
}

/// Plan merges of `existing` packs against a target `distribution`
///
/// Returns no operations when there are no more packs than buckets. Otherwise
/// packs are taken largest first (stable on ties): a pack at least as large as
/// the head bucket is left alone and its revisions are subtracted from the
/// head buckets; a smaller pack joins the current merge, which closes once it
/// reaches the head bucket's size.
///
/// The buckets only run out early when packs share keys. The packs left over
/// then join the last merge; with no merge planned they are merged with the
/// smallest pack that was left alone, so no planned merge holds a single pack.
pub fn plan(existing: &[PackSummary], distribution: &[u64]) -> Vec<PackOperation> {
    if existing.len() <= distribution.len() {
        return Vec::new();
    }

    let mut packs = existing.to_vec();
    packs.sort_by(|a, b| b.revision_count.cmp(&a.revision_count));

    let mut buckets: VecDeque<u64> = distribution.iter().copied().collect();
    let mut operations = vec![PackOperation::default()];
    let mut left_alone = Vec::new();
    let mut leftovers = Vec::new();

    for pack in packs {
        let Some(&head) = buckets.front() else {
            leftovers.push(pack);
            continue;
        };

        if pack.revision_count >= head {
            // Already packed at least as well as this bucket asks for
            let mut remaining = pack.revision_count;
            while remaining > 0 {
                let Some(bucket) = buckets.front_mut() else {
                    break;
                };
                if remaining >= *bucket {
                    remaining -= *bucket;
                    buckets.pop_front();
                } else {
                    *bucket -= remaining;
                    remaining = 0;
                }
            }
            left_alone.push(pack);
        } else {
            let closed = append(&mut operations, pack) >= head;
            if closed {
                buckets.pop_front();
                operations.push(PackOperation::default());
            }
        }
    }

    operations.retain(|op| !op.packs.is_empty());
    if !leftovers.is_empty() {
        if operations.is_empty() {
            if let Some(smallest) = left_alone.pop() {
                append(&mut operations, smallest);
            }
        }
        for pack in leftovers {
            append(&mut operations, pack);
        }
    }
    operations
}

/// Add a pack to the open operation; returns the operation's new total
fn append(operations: &mut Vec<PackOperation>, pack: PackSummary) -> u64 {
    if operations.is_empty() {
        operations.push(PackOperation::default());
    }
    let last = operations.len() - 1;
    let current = &mut operations[last];
    current.revision_count += pack.revision_count;
    current.packs.push(pack.name);
    current.revision_count
}
