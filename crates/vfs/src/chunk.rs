//! Chunked upload reassembly.
//!
//! Large uploads arrive as numbered chunks which may be retried, resumed at
//! a non-zero offset, or interleaved with chunks of other uploads. The table
//! keeps one open write handle per chunk id.
//!
//! Locking is two-level. The table mutex only guards lookup, insert and
//! delete of slots and is never held during I/O. Each slot has its own mutex
//! which is held for the duration of a write, so chunks of the same id
//! serialize while different ids proceed in parallel.
//!
//! A slot that has been closed (by merge or by a failed write) is marked
//! evicted before it leaves the table. A caller that fetched the slot just
//! before the eviction sees the mark once it gets the lock and starts over
//! with a fresh slot, so a stale handle is never reused.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::backend::RemoteWriter;
use crate::error::{Result, VfsError};

/// Client-supplied identifier of a chunked upload.
pub type ChunkId = u64;

/// Byte range a chunk claims to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkRange {
    /// Offset of the first byte of this chunk in the final file.
    pub offset: u64,
    /// Declared chunk length.
    pub length: u64,
    /// Declared size of the final file.
    pub total_size: u64,
}

struct OpenChunk {
    path: String,
    writer: Box<dyn RemoteWriter>,
    offset: u64,
}

#[derive(Default)]
struct ChunkSlot {
    open: Option<OpenChunk>,
    evicted: bool,
}

type SharedSlot = Arc<Mutex<ChunkSlot>>;

struct TableEntry {
    slot: SharedSlot,
    // Set once the target has been opened; reads never wait on the slot.
    open: bool,
}

/// Per-volume map from chunk id to its open write handle.
#[derive(Default)]
pub struct ChunkTable {
    slots: Mutex<HashMap<ChunkId, TableEntry>>,
}

impl ChunkTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one chunk, opening the target on the first chunk of `id`.
    ///
    /// `open` is called with the chunk's declared offset when no handle is
    /// registered yet. On a write failure the handle is closed and the id
    /// forgotten, so the next call starts over. Returns the running offset.
    pub fn write_chunk<F>(
        &self,
        id: ChunkId,
        path: &str,
        range: ChunkRange,
        data: &mut dyn Read,
        mut open: F,
    ) -> Result<u64>
    where
        F: FnMut(u64) -> Result<Box<dyn RemoteWriter>>,
    {
        loop {
            let shared = self.slot(id)?;
            let mut slot = lock_slot(id, &shared)?;
            if slot.evicted {
                continue;
            }

            let registered = slot
                .open
                .as_ref()
                .map(|chunk| (chunk.path.clone(), chunk.offset));
            match registered {
                None => match open(range.offset) {
                    Ok(writer) => {
                        debug!(chunk_id = id, path, offset = range.offset, "Opened chunk target");
                        slot.open = Some(OpenChunk {
                            path: path.to_string(),
                            writer,
                            offset: range.offset,
                        });
                        self.mark_open(id, &shared);
                    }
                    Err(e) => {
                        slot.evicted = true;
                        drop(slot);
                        self.forget(id, &shared);
                        return Err(e);
                    }
                },
                Some((open_path, _)) if open_path != path => {
                    return Err(VfsError::ChunkStateConflict {
                        chunk_id: id,
                        reason: format!("already writing {open_path}, not {path}"),
                    });
                }
                Some((_, offset)) if offset != range.offset => {
                    debug!(
                        chunk_id = id,
                        expected = offset,
                        declared = range.offset,
                        "Chunk offset differs from running offset"
                    );
                }
                Some(_) => {}
            }

            let result = match slot.open.as_mut() {
                Some(chunk) => chunk.writer.write_from(data).map(|n| {
                    chunk.offset += n;
                    chunk.offset
                }),
                None => Err(std::io::Error::other("chunk handle missing")),
            };

            return match result {
                Ok(offset) => Ok(offset),
                Err(e) => {
                    warn!(chunk_id = id, path, error = %e, "Chunk write failed, discarding handle");
                    if let Some(open) = slot.open.take() {
                        if let Err(close_err) = open.writer.close() {
                            debug!(chunk_id = id, error = %close_err, "Closing failed chunk handle");
                        }
                    }
                    slot.evicted = true;
                    drop(slot);
                    self.forget(id, &shared);
                    Err(VfsError::from(e))
                }
            };
        }
    }

    /// Close and forget the handle of `id`.
    ///
    /// Returns the number of bytes written through it, or `None` when no
    /// handle was registered (already merged or never opened).
    pub fn close(&self, id: ChunkId) -> Result<Option<u64>> {
        let removed = self.lock_table(id)?.remove(&id);
        let Some(TableEntry { slot: shared, .. }) = removed else {
            return Ok(None);
        };
        let mut slot = lock_slot(id, &shared)?;
        slot.evicted = true;
        match slot.open.take() {
            Some(open) => {
                open.writer.close()?;
                debug!(chunk_id = id, path = %open.path, size = open.offset, "Closed chunk target");
                Ok(Some(open.offset))
            }
            None => Ok(None),
        }
    }

    /// Whether `id` has a registered handle.
    pub fn contains(&self, id: ChunkId) -> bool {
        self.slots
            .lock()
            .map(|slots| slots.get(&id).is_some_and(|entry| entry.open))
            .unwrap_or(false)
    }

    /// Running offset of `id`, if open.
    pub fn offset(&self, id: ChunkId) -> Option<u64> {
        let shared = self
            .slots
            .lock()
            .ok()?
            .get(&id)
            .filter(|entry| entry.open)
            .map(|entry| Arc::clone(&entry.slot))?;
        let slot = shared.lock().ok()?;
        slot.open.as_ref().map(|open| open.offset)
    }

    /// Ids with a registered handle.
    pub fn open_ids(&self) -> Vec<ChunkId> {
        self.slots
            .lock()
            .map(|slots| {
                slots
                    .iter()
                    .filter(|(_, entry)| entry.open)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.values().filter(|entry| entry.open).count())
            .unwrap_or(0)
    }

    /// Whether no handle is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_table(&self, id: ChunkId) -> Result<MutexGuard<'_, HashMap<ChunkId, TableEntry>>> {
        self.slots.lock().map_err(|_| VfsError::ChunkStateConflict {
            chunk_id: id,
            reason: "chunk table lock poisoned".to_string(),
        })
    }

    fn slot(&self, id: ChunkId) -> Result<SharedSlot> {
        let mut slots = self.lock_table(id)?;
        let entry = slots.entry(id).or_insert_with(|| TableEntry {
            slot: SharedSlot::default(),
            open: false,
        });
        Ok(Arc::clone(&entry.slot))
    }

    /// Flag `id` as holding an open handle if it still maps to `shared`.
    fn mark_open(&self, id: ChunkId, shared: &SharedSlot) {
        if let Ok(mut slots) = self.slots.lock() {
            if let Some(entry) = slots.get_mut(&id).filter(|e| Arc::ptr_eq(&e.slot, shared)) {
                entry.open = true;
            }
        }
    }

    /// Drop `id` from the table if it still maps to `shared`.
    fn forget(&self, id: ChunkId, shared: &SharedSlot) {
        if let Ok(mut slots) = self.slots.lock() {
            if slots.get(&id).is_some_and(|current| Arc::ptr_eq(&current.slot, shared)) {
                slots.remove(&id);
            }
        }
    }
}

fn lock_slot(id: ChunkId, shared: &SharedSlot) -> Result<MutexGuard<'_, ChunkSlot>> {
    shared.lock().map_err(|_| VfsError::ChunkStateConflict {
        chunk_id: id,
        reason: "chunk lock poisoned".to_string(),
    })
}
