// ==============================================================================
// position_index.rs - Locus-Keyed Accumulation Index
// ==============================================================================
// Description: Sharded ordered map from locus to the records seen there
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================
// Concurrency:
//   Inserts from the ingest workers lock only the shard owning the locus, so
//   inserts to different loci proceed in parallel and a bucket is created at
//   most once. Flushes run between ingest cycles and never overlap inserts.
// ==============================================================================

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::models::{Locus, ProvenanceLink};

const DEFAULT_SHARDS: usize = 16;

/// Records that share a locus
pub type Bucket = Vec<ProvenanceLink>;

/// Locus-keyed index shared by the ingest workers
#[derive(Debug)]
pub struct PositionIndex {
    shards: Vec<Mutex<BTreeMap<Locus, Bucket>>>,
    loci: AtomicUsize,
}

impl Default for PositionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionIndex {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(BTreeMap::new())).collect(),
            loci: AtomicUsize::new(0),
        }
    }

    fn shard_for(&self, locus: &Locus) -> usize {
        let mut hasher = DefaultHasher::new();
        locus.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    fn lock(shard: &Mutex<BTreeMap<Locus, Bucket>>) -> MutexGuard<'_, BTreeMap<Locus, Bucket>> {
        // A poisoned shard still holds consistent buckets: inserts are single pushes
        shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a link to the bucket for `locus`, creating the bucket if needed
    pub fn insert(&self, locus: Locus, link: ProvenanceLink) {
        let mut shard = Self::lock(&self.shards[self.shard_for(&locus)]);
        let bucket = shard.entry(locus).or_insert_with(|| {
            self.loci.fetch_add(1, Ordering::Relaxed);
            Vec::new()
        });
        bucket.push(link);
    }

    /// Number of distinct loci currently held
    pub fn len(&self) -> usize {
        self.loci.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every bucket at or before `watermark`, in locus order
    pub fn flush_below(&self, watermark: Locus) -> Vec<(Locus, Bucket)> {
        let mut drained: Vec<(Locus, Bucket)> = Vec::new();
        for shard in &self.shards {
            let mut map = Self::lock(shard);
            let kept = match watermark.successor() {
                Some(bound) => map.split_off(&bound),
                None => BTreeMap::new(),
            };
            let flushed = std::mem::replace(&mut *map, kept);
            drained.extend(flushed);
        }
        self.loci.fetch_sub(drained.len(), Ordering::Relaxed);
        drained.sort_unstable_by_key(|(locus, _)| *locus);
        drained
    }
}
