//! Bucket allocator and mark-and-sweep heap.
//!
//! The heap carves fixed-size buckets into chains of byte-accounted blocks:
//! first-fit allocation coalesces free neighbours while scanning, keeps a
//! "next likely free" cursor per bucket, falls back to the other buckets
//! round-robin, then to a garbage collection, then to growing a new bucket.
//! Collectable objects are tables; they live in an id-addressed arena whose
//! cells are tied to their backing block, so a bucket walk observes live
//! collectable counts and byte totals, and sweeping a block drops the table
//! it owns.
//!
//! The heap cannot enumerate roots itself; allocation entry points take a
//! marking callback that the interpreter points at its register file,
//! stacks and program memory.

use core::mem;

use bitflags::bitflags;
use tracing::debug;

use crate::consts::MAX_BUCKETS;
use crate::error::RuntimeFault;
use crate::table::{Key, Table};
use crate::value::Value;

/// Handle to a table in the heap's arena.
///
/// Plain data: values and snapshots copy it freely, equality is table
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(pub(crate) u32);

/// Handle to an allocated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    bucket: usize,
    slot: usize,
}

/// Collectable kind tag carried by a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockKind {
    /// Not subject to collection; freed explicitly.
    #[default]
    None,
    /// A table; swept by the collector when unmarked.
    Table,
}

bitflags! {
    /// Block status bits.
    struct BlockFlags: u8 {
        const USED = 0b01;
        const MARKED = 0b10;
    }
}

/// Accounted size of a block header.
const HEADER_SIZE: usize = 24;

/// Per-bucket statistics, as reported by [`Heap::available`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    /// Free bytes, headers of free blocks included.
    pub available: usize,
    /// Total block count.
    pub blocks: usize,
    /// Free block count.
    pub free_blocks: usize,
}

#[derive(Debug)]
struct Block {
    size: usize,
    next: Option<usize>,
    flags: BlockFlags,
    kind: BlockKind,
    owner: Option<TableId>,
}

#[derive(Debug)]
struct Bucket {
    /// Total accounted bytes, block headers included. Invariant: equals the
    /// sum of `HEADER_SIZE + size` over the chain.
    total: usize,
    head: usize,
    /// Next-likely-free hint; always a slot still linked into the chain.
    cursor: Option<usize>,
    blocks: Vec<Block>,
    spare_slots: Vec<usize>,
}

impl Bucket {
    fn new(size: usize) -> Self {
        Self {
            total: HEADER_SIZE + size,
            head: 0,
            cursor: None,
            blocks: vec![Block {
                size,
                next: None,
                flags: BlockFlags::empty(),
                kind: BlockKind::None,
                owner: None,
            }],
            spare_slots: Vec::new(),
        }
    }

    fn add_slot(&mut self, block: Block) -> usize {
        match self.spare_slots.pop() {
            Some(slot) => {
                self.blocks[slot] = block;
                slot
            }
            None => {
                self.blocks.push(block);
                self.blocks.len() - 1
            }
        }
    }

    /// Unlinks a block absorbed by coalescing.
    fn retire(&mut self, slot: usize) {
        if self.cursor == Some(slot) {
            self.cursor = None;
        }
        self.spare_slots.push(slot);
    }

    /// First-fit scan from `start`, coalescing runs of free blocks on the
    /// way, as the allocator does instead of merging eagerly on free.
    fn find_free(&mut self, start: usize, size: usize) -> Option<usize> {
        let mut current = Some(start);
        loop {
            while let Some(slot) = current {
                if self.blocks[slot].flags.contains(BlockFlags::USED) {
                    current = self.blocks[slot].next;
                } else {
                    break;
                }
            }
            let slot = current?;

            let mut next = self.blocks[slot].next;
            while self.blocks[slot].size < size {
                let Some(neighbour) = next else { break };
                if self.blocks[neighbour].flags.contains(BlockFlags::USED) {
                    break;
                }
                self.blocks[slot].size += HEADER_SIZE + self.blocks[neighbour].size;
                next = self.blocks[neighbour].next;
                self.retire(neighbour);
            }
            self.blocks[slot].next = next;

            if self.blocks[slot].size >= size {
                return Some(slot);
            }
            current = next;
        }
    }

    /// Carves `size` bytes out of a free block found from `start`.
    fn alloc(&mut self, start: usize, size: usize) -> Option<usize> {
        let slot = self.find_free(start, size)?;

        let leftover = self.blocks[slot].size - size;
        if leftover > HEADER_SIZE {
            let tail = Block {
                size: leftover - HEADER_SIZE,
                next: self.blocks[slot].next,
                flags: BlockFlags::empty(),
                kind: BlockKind::None,
                owner: None,
            };
            let tail_slot = self.add_slot(tail);
            self.blocks[slot].next = Some(tail_slot);
            self.blocks[slot].size = size;
        }

        self.blocks[slot].flags = BlockFlags::USED;
        self.blocks[slot].kind = BlockKind::None;
        self.blocks[slot].owner = None;

        // Leave the cursor on the next free block behind the allocation.
        let mut follow = self.blocks[slot].next;
        while let Some(candidate) = follow {
            if !self.blocks[candidate].flags.contains(BlockFlags::USED) {
                break;
            }
            follow = self.blocks[candidate].next;
        }
        self.cursor = follow;

        Some(slot)
    }

    fn alloc_from_cursor(&mut self, size: usize) -> Option<usize> {
        let cursor = self.cursor?;
        self.alloc(cursor, size)
    }

    fn merge_free_runs(&mut self) {
        let mut current = Some(self.head);
        while let Some(slot) = current {
            if self.blocks[slot].flags.contains(BlockFlags::USED) {
                current = self.blocks[slot].next;
                continue;
            }
            let mut next = self.blocks[slot].next;
            while let Some(neighbour) = next {
                if self.blocks[neighbour].flags.contains(BlockFlags::USED) {
                    break;
                }
                self.blocks[slot].size += HEADER_SIZE + self.blocks[neighbour].size;
                next = self.blocks[neighbour].next;
                self.retire(neighbour);
            }
            self.blocks[slot].next = next;
            current = next;
        }
    }

    fn info(&self) -> MemInfo {
        let mut info = MemInfo {
            available: 0,
            blocks: 0,
            free_blocks: 0,
        };
        let mut current = Some(self.head);
        while let Some(slot) = current {
            let block = &self.blocks[slot];
            if !block.flags.contains(BlockFlags::USED) {
                info.available += HEADER_SIZE + block.size;
                info.free_blocks += 1;
            }
            info.blocks += 1;
            current = block.next;
        }
        info
    }
}

struct TableCell {
    table: Table,
    block: BlockRef,
    charged_capacity: usize,
}

/// The VM heap: buckets of accounted blocks plus the table arena.
pub struct Heap {
    bucket_size: usize,
    buckets: Vec<Bucket>,
    current_bucket: usize,
    tables: Vec<Option<TableCell>>,
    spare_ids: Vec<u32>,
}

/// Accounted footprint of a table pre-sized for `capacity` entries.
fn table_footprint(capacity: usize) -> usize {
    mem::size_of::<Table>() + capacity * (mem::size_of::<Key>() + mem::size_of::<Value>() + 8)
}

/// Accounted footprint of an iterator snapshot over `entries` keys.
pub(crate) fn snapshot_footprint(entries: usize) -> usize {
    mem::size_of::<usize>() * 4 + entries * mem::size_of::<Key>()
}

impl Heap {
    /// Creates a heap with a single bucket of `bucket_size` bytes.
    pub fn new(bucket_size: usize) -> Self {
        debug!(bucket_size, "mm: created bucket 0");
        Self {
            bucket_size,
            buckets: vec![Bucket::new(bucket_size)],
            current_bucket: 0,
            tables: Vec::new(),
            spare_ids: Vec::new(),
        }
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Statistics for one bucket.
    pub fn available(&self, bucket: usize) -> MemInfo {
        self.buckets[bucket].info()
    }

    /// Count of collectable blocks across all buckets.
    pub fn collectable_blocks(&self) -> usize {
        self.buckets
            .iter()
            .flat_map(|b| &b.blocks)
            .filter(|b| b.flags.contains(BlockFlags::USED) && b.kind == BlockKind::Table)
            .count()
    }

    /// Bytes currently allocated across all buckets, headers included.
    pub fn allocated_bytes(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.total - b.info().available)
            .sum()
    }

    fn add_bucket(&mut self) -> bool {
        if self.buckets.len() >= MAX_BUCKETS {
            return false;
        }
        debug!(
            bucket = self.buckets.len(),
            size = self.bucket_size,
            "mm: created bucket"
        );
        self.buckets.push(Bucket::new(self.bucket_size));
        true
    }

    /// Pure search: cursor position, then the current bucket from its head,
    /// then the remaining buckets round-robin. No collection, no growth.
    fn search(&mut self, size: usize) -> Option<BlockRef> {
        let current = &mut self.buckets[self.current_bucket];
        if let Some(slot) = current.alloc_from_cursor(size) {
            return Some(BlockRef {
                bucket: self.current_bucket,
                slot,
            });
        }
        let head = current.head;
        if let Some(slot) = current.alloc(head, size) {
            return Some(BlockRef {
                bucket: self.current_bucket,
                slot,
            });
        }
        for _ in 1..self.buckets.len() {
            self.current_bucket = (self.current_bucket + 1) % self.buckets.len();
            let bucket = &mut self.buckets[self.current_bucket];
            let head = bucket.head;
            if let Some(slot) = bucket.alloc(head, size) {
                return Some(BlockRef {
                    bucket: self.current_bucket,
                    slot,
                });
            }
        }
        None
    }

    /// Allocates `size` accounted bytes.
    ///
    /// On exhaustion runs a collection through `mark`, rescans every bucket,
    /// then grows a new bucket; only when all of that fails does the
    /// allocator give up.
    pub fn alloc(
        &mut self,
        size: usize,
        mark: impl FnOnce(&mut Heap),
    ) -> Result<BlockRef, RuntimeFault> {
        self.alloc_named(size, mark, "Malloc")
    }

    fn alloc_named(
        &mut self,
        size: usize,
        mark: impl FnOnce(&mut Heap),
        site: &'static str,
    ) -> Result<BlockRef, RuntimeFault> {
        if let Some(block) = self.search(size) {
            return Ok(block);
        }

        self.collect(mark);
        for bucket in 0..self.buckets.len() {
            let head = self.buckets[bucket].head;
            if let Some(slot) = self.buckets[bucket].alloc(head, size) {
                self.current_bucket = bucket;
                return Ok(BlockRef { bucket, slot });
            }
        }

        if self.add_bucket() {
            self.current_bucket = self.buckets.len() - 1;
            let bucket = self.current_bucket;
            let head = self.buckets[bucket].head;
            if let Some(slot) = self.buckets[bucket].alloc(head, size) {
                return Ok(BlockRef { bucket, slot });
            }
        }

        Err(RuntimeFault::OutOfMemory(site))
    }

    /// Releases a block. Coalescing is deferred to the next allocation scan
    /// or collection merge pass.
    pub fn free(&mut self, block: BlockRef) {
        let b = &mut self.buckets[block.bucket].blocks[block.slot];
        b.flags.remove(BlockFlags::USED);
        b.kind = BlockKind::None;
        b.owner = None;
    }

    /// Moves an allocation to a block of `new_size` bytes, keeping the kind
    /// tag and arena ownership of the old block.
    pub fn realloc(
        &mut self,
        block: BlockRef,
        new_size: usize,
        mark: impl FnOnce(&mut Heap),
    ) -> Result<BlockRef, RuntimeFault> {
        let kind = self.buckets[block.bucket].blocks[block.slot].kind;
        let owner = self.buckets[block.bucket].blocks[block.slot].owner;

        let new_block = self.alloc_named(new_size, mark, "Realloc")?;
        {
            let b = &mut self.buckets[new_block.bucket].blocks[new_block.slot];
            b.kind = kind;
            b.owner = owner;
        }
        if let Some(id) = owner {
            if let Some(cell) = self.tables[id.0 as usize].as_mut() {
                cell.block = new_block;
            }
        }
        self.free(block);
        Ok(new_block)
    }

    /// Runs a full collection cycle: unmark, mark through the callback,
    /// sweep dead collectables, merge free runs.
    pub fn collect(&mut self, mark: impl FnOnce(&mut Heap)) -> usize {
        for bucket in &mut self.buckets {
            for block in &mut bucket.blocks {
                block.flags.remove(BlockFlags::MARKED);
            }
        }

        mark(self);

        let mut count = 0;
        for bucket in 0..self.buckets.len() {
            let mut current = Some(self.buckets[bucket].head);
            while let Some(slot) = current {
                current = self.buckets[bucket].blocks[slot].next;

                let block = &self.buckets[bucket].blocks[slot];
                if block.flags.contains(BlockFlags::USED)
                    && block.kind == BlockKind::Table
                    && !block.flags.contains(BlockFlags::MARKED)
                {
                    let owner = block.owner;
                    let b = &mut self.buckets[bucket].blocks[slot];
                    b.kind = BlockKind::None;
                    b.flags.remove(BlockFlags::USED);
                    b.owner = None;
                    if let Some(id) = owner {
                        // Dropping the cell runs the table destructor:
                        // entries and their string payloads go with it.
                        self.tables[id.0 as usize] = None;
                        self.spare_ids.push(id.0);
                    }
                    count += 1;
                }
            }
        }

        for bucket in &mut self.buckets {
            bucket.merge_free_runs();
        }

        self.current_bucket = 0;

        debug!(count, "mm: garbage collected objects");
        count
    }

    /// Allocates a table of the given capacity hint.
    ///
    /// Collectable tables are swept when unreachable; non-collectable ones
    /// (call-frame locals) are only released through [`Heap::free_table`].
    pub fn create_table(
        &mut self,
        capacity: usize,
        kind: BlockKind,
        mark: impl FnOnce(&mut Heap),
    ) -> Result<TableId, RuntimeFault> {
        let capacity = capacity.max(1);
        let block = self.alloc(table_footprint(capacity), mark)?;

        let id = match self.spare_ids.pop() {
            Some(id) => id,
            None => {
                self.tables.push(None);
                (self.tables.len() - 1) as u32
            }
        };
        self.tables[id as usize] = Some(TableCell {
            table: Table::new(capacity),
            block,
            charged_capacity: capacity,
        });

        let b = &mut self.buckets[block.bucket].blocks[block.slot];
        b.kind = kind;
        b.owner = Some(TableId(id));
        Ok(TableId(id))
    }

    /// Explicitly releases a table and its block.
    pub fn free_table(&mut self, id: TableId) {
        if let Some(cell) = self.tables[id.0 as usize].take() {
            self.free(cell.block);
            self.spare_ids.push(id.0);
        }
    }

    /// Shared access to a table.
    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0 as usize]
            .as_ref()
            .expect("table handle outlived its table")
            .table
    }

    /// Mutable access to a table.
    pub fn table_mut(&mut self, id: TableId) -> &mut Table {
        &mut self.tables[id.0 as usize]
            .as_mut()
            .expect("table handle outlived its table")
            .table
    }

    /// True when the id names a live table.
    pub fn is_live(&self, id: TableId) -> bool {
        self.tables
            .get(id.0 as usize)
            .is_some_and(|cell| cell.is_some())
    }

    /// Number of live tables in the arena.
    pub fn table_count(&self) -> usize {
        self.tables.iter().filter(|c| c.is_some()).count()
    }

    /// Re-charges a table's block after its capacity changed.
    pub fn sync_table_block(
        &mut self,
        id: TableId,
        mark: impl FnOnce(&mut Heap),
    ) -> Result<(), RuntimeFault> {
        let Some(cell) = self.tables[id.0 as usize].as_ref() else {
            return Ok(());
        };
        let capacity = cell.table.capacity();
        if capacity == cell.charged_capacity {
            return Ok(());
        }
        let block = cell.block;
        // The table being re-charged may not be rooted yet (a host function
        // building its result); pin it through any collection the move
        // triggers.
        self.realloc(block, table_footprint(capacity), |h| {
            h.mark_recursive(id);
            mark(h);
        })?;
        if let Some(cell) = self.tables[id.0 as usize].as_mut() {
            cell.charged_capacity = capacity;
        }
        Ok(())
    }

    /// Marking hook: true when the table's block is already marked.
    pub fn is_marked(&self, id: TableId) -> bool {
        let block = match self.tables[id.0 as usize].as_ref() {
            Some(cell) => cell.block,
            None => return true,
        };
        self.buckets[block.bucket].blocks[block.slot]
            .flags
            .contains(BlockFlags::MARKED)
    }

    /// Marking hook: flags the table's block as reachable.
    pub fn mark(&mut self, id: TableId) {
        if let Some(cell) = self.tables[id.0 as usize].as_ref() {
            let block = cell.block;
            self.buckets[block.bucket].blocks[block.slot]
                .flags
                .insert(BlockFlags::MARKED);
        }
    }

    /// Marks a table and every table reachable through its entries.
    pub fn mark_recursive(&mut self, id: TableId) {
        if !self.is_live(id) || self.is_marked(id) {
            return;
        }
        self.mark(id);
        let children: Vec<TableId> = self
            .table(id)
            .values()
            .filter_map(Value::table_id)
            .collect();
        for child in children {
            self.mark_recursive(child);
        }
    }

    /// Allocates an uncollectable auxiliary block (iterator snapshots).
    pub fn alloc_aux(
        &mut self,
        size: usize,
        mark: impl FnOnce(&mut Heap),
    ) -> Result<BlockRef, RuntimeFault> {
        self.alloc(size, mark)
    }

    /// Logs an allocation and corruption report at debug level.
    pub fn memory_report(&self) {
        for (index, bucket) in self.buckets.iter().enumerate() {
            let mut sum = 0;
            let mut allocations = 0;
            let mut collectable = 0;
            let mut current = Some(bucket.head);
            while let Some(slot) = current {
                let block = &bucket.blocks[slot];
                if block.flags.contains(BlockFlags::USED) {
                    allocations += 1;
                    if block.kind == BlockKind::Table {
                        collectable += 1;
                    }
                }
                sum += HEADER_SIZE + block.size;
                current = block.next;
            }
            debug!(bucket = index, allocations, collectable, "mm: bucket report");
            if sum != bucket.total {
                debug!(
                    bucket = index,
                    sum,
                    total = bucket.total,
                    "mm: corruption detected, block sum does not match bucket size"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_roots(_: &mut Heap) {}

    #[test]
    fn alloc_splits_and_accounts() {
        let mut heap = Heap::new(1024);
        let before = heap.available(0);
        assert_eq!(before.free_blocks, 1);

        let block = heap.alloc(100, no_roots).unwrap();
        let after = heap.available(0);
        assert_eq!(after.blocks, 2);
        assert_eq!(after.free_blocks, 1);
        assert_eq!(before.available - after.available, 100 + HEADER_SIZE);

        heap.free(block);
        assert_eq!(heap.available(0).free_blocks, 2);
    }

    #[test]
    fn small_remainders_are_consumed_whole() {
        let mut heap = Heap::new(200);
        // Leaves less than a header behind, so the whole block is taken.
        let _block = heap.alloc(200 - HEADER_SIZE, no_roots).unwrap();
        let info = heap.available(0);
        assert_eq!(info.blocks, 1);
        assert_eq!(info.free_blocks, 0);
    }

    #[test]
    fn free_blocks_coalesce_during_the_next_scan() {
        let mut heap = Heap::new(400);
        let a = heap.alloc(80, no_roots).unwrap();
        let b = heap.alloc(80, no_roots).unwrap();
        let _c = heap.alloc(80, no_roots).unwrap();
        heap.free(a);
        heap.free(b);

        // 80 + 80 + header only fits if the two freed neighbours merge.
        let merged = heap.alloc(160 + HEADER_SIZE, no_roots).unwrap();
        assert_eq!(merged.bucket, 0);
    }

    #[test]
    fn exhaustion_grows_a_new_bucket() {
        let mut heap = Heap::new(256);
        let _a = heap.alloc(200, no_roots).unwrap();
        let b = heap.alloc(200, no_roots).unwrap();
        assert_eq!(heap.bucket_count(), 2);
        assert_eq!(b.bucket, 1);
    }

    #[test]
    fn exhaustion_past_the_bucket_limit_reports_oom() {
        let mut heap = Heap::new(64);
        let mut held = Vec::new();
        loop {
            match heap.alloc(40, no_roots) {
                Ok(block) => held.push(block),
                Err(fault) => {
                    assert!(matches!(fault, RuntimeFault::OutOfMemory("Malloc")));
                    break;
                }
            }
        }
        assert_eq!(heap.bucket_count(), MAX_BUCKETS);
    }

    #[test]
    fn collection_sweeps_unreachable_tables() {
        let mut heap = Heap::new(65536);
        let kept = heap.create_table(4, BlockKind::Table, no_roots).unwrap();
        let dropped = heap.create_table(4, BlockKind::Table, no_roots).unwrap();
        assert_eq!(heap.collectable_blocks(), 2);

        let swept = heap.collect(move |heap| heap.mark(kept));
        assert_eq!(swept, 1);
        assert_eq!(heap.collectable_blocks(), 1);
        assert!(heap.is_live(kept));
        assert!(!heap.is_live(dropped));
    }

    #[test]
    fn locals_tables_survive_collection_unmarked() {
        let mut heap = Heap::new(65536);
        let locals = heap.create_table(4, BlockKind::None, no_roots).unwrap();
        let swept = heap.collect(no_roots);
        assert_eq!(swept, 0);
        assert!(heap.is_live(locals));
        heap.free_table(locals);
        assert!(!heap.is_live(locals));
    }

    #[test]
    fn realloc_preserves_the_kind_tag_and_ownership() {
        let mut heap = Heap::new(65536);
        let id = heap.create_table(1, BlockKind::Table, no_roots).unwrap();
        for i in 0..32 {
            heap.table_mut(id).insert(Key::Int(i), Value::Num(i as f64));
        }
        heap.sync_table_block(id, no_roots).unwrap();

        // Still exactly one collectable block, and a collection that marks
        // nothing must sweep it: the tag moved with the data.
        assert_eq!(heap.collectable_blocks(), 1);
        let swept = heap.collect(no_roots);
        assert_eq!(swept, 1);
        assert!(!heap.is_live(id));
    }

    #[test]
    fn collection_runs_inside_exhausted_alloc() {
        let size = table_footprint(64);
        let mut heap = Heap::new(size + HEADER_SIZE);
        let garbage = heap.create_table(64, BlockKind::Table, no_roots).unwrap();
        assert!(heap.is_live(garbage));

        // Nothing marks `garbage`, so the next allocation collects it
        // instead of growing a second bucket.
        let _block = heap.alloc(size, no_roots).unwrap();
        assert_eq!(heap.bucket_count(), 1);
        assert!(!heap.is_live(garbage));
    }

    #[test]
    fn merge_pass_restores_a_single_free_block() {
        let mut heap = Heap::new(1024);
        let blocks: Vec<_> = (0..4)
            .map(|_| heap.alloc(100, no_roots).unwrap())
            .collect();
        for block in blocks {
            heap.free(block);
        }
        heap.collect(no_roots);
        let info = heap.available(0);
        assert_eq!(info.blocks, 1);
        assert_eq!(info.available, 1024 + HEADER_SIZE);
    }
}
