use super::{OffsetReader, SourceOffset, SourcePartition};
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Read-your-writes view over a durable offset store for one task.
///
/// The durable store only returns offsets that have been flushed, and
/// flushing happens asynchronously some time after a record was produced.
/// Without this adapter a task would re-read a stale offset on its next
/// cycle and emit the same build again.
///
/// Construction performs exactly one bulk read for every partition the
/// task owns. After that the store is never consulted again: lookups are
/// answered from the values written by this task (`cache`) and, failing
/// that, from the values loaded at construction.
///
/// The cache lives as long as the task. It is not persisted; durability is
/// the job of the offset writer.
#[derive(Debug, Default)]
pub struct ReadYourWritesOffsets {
    /// Flushed offsets loaded at construction
    offsets: HashMap<SourcePartition, SourceOffset>,
    /// Offsets written by this task since construction
    cache: HashMap<SourcePartition, SourceOffset>,
}

impl ReadYourWritesOffsets {
    /// Loads the flushed offsets of `partitions` with a single bulk read.
    ///
    /// An empty partition set does not touch the store.
    pub fn load(reader: &dyn OffsetReader, partitions: &[SourcePartition]) -> Result<Self> {
        if partitions.is_empty() {
            debug!("No partitions assigned, skipping offset load");
            return Ok(Self::default());
        }

        let offsets = reader
            .offsets(partitions)
            .context("Failed to load offsets from offset store")?;

        // Drop anything the reader returned for partitions we did not ask for.
        let offsets: HashMap<_, _> = offsets
            .into_iter()
            .filter(|(partition, _)| partitions.contains(partition))
            .collect();

        debug!(
            requested = partitions.len(),
            loaded = offsets.len(),
            "Loaded offsets from offset store"
        );
        trace!(offsets = ?offsets, "Loaded offsets");

        Ok(Self {
            offsets,
            cache: HashMap::new(),
        })
    }

    /// Returns the last known offset for `partition`.
    ///
    /// A value cached by this task wins over the loaded value: the loaded
    /// value can only be older, since the store was read before any write.
    pub fn get_offset(&self, partition: &SourcePartition) -> Option<&SourceOffset> {
        self.cache
            .get(partition)
            .or_else(|| self.offsets.get(partition))
    }

    /// Records an offset written by this task.
    ///
    /// Must be called before the cycle that produced it returns, so the next
    /// cycle observes it even if the store has not flushed yet.
    pub fn cache(&mut self, partition: SourcePartition, offset: SourceOffset) {
        trace!(partition = %partition, offset = %offset, "Caching offset");
        self.cache.insert(partition, offset);
    }

    /// Returns true if a flushed offset was loaded for `partition`.
    pub fn contains_loaded(&self, partition: &SourcePartition) -> bool {
        self.offsets.contains_key(partition)
    }

    /// Number of offsets written by this task so far.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
