//! Root enumeration for the collector.
//!
//! A table is reachable through program memory, any register, the value
//! stack, the memory-pointer stack, the current cursor, any call frame's
//! locals, or any live iterator's table; everything else is garbage. Frame
//! locals tables themselves are not collectable, but their children are
//! reached through them.

use crate::heap::{Heap, TableId};
use crate::value::Value;

use super::{CallFrame, Cursor, TableIterator, Vm};

/// Borrowed view of every GC root, detached from the heap so a marking
/// callback can run while the allocator holds the heap mutably.
pub(crate) struct RootSet<'a> {
    pub registers: &'a [Value],
    pub stack: &'a [Value],
    pub memory_stack: &'a [Cursor],
    pub cursor: &'a Cursor,
    pub program_memory: &'a Value,
    pub frames: &'a [CallFrame],
    pub iterators: &'a [Option<TableIterator>],
}

impl RootSet<'_> {
    /// Marks every table reachable from the roots.
    pub fn mark(&self, heap: &mut Heap) {
        for value in self.registers {
            mark_value(heap, value);
        }
        for value in self.stack {
            mark_value(heap, value);
        }
        mark_value(heap, self.program_memory);
        for frame in self.frames {
            // The locals table is not itself collectable; its children are
            // only reachable through it.
            if let Some(id) = frame.locals.table_id() {
                mark_children(heap, id);
            }
        }
        mark_cursor(heap, self.cursor);
        for cursor in self.memory_stack {
            mark_cursor(heap, cursor);
        }
        // The parent snapshot is deliberately not a root: it is a weak
        // one-slot copy read only by LPTBL, which checks liveness.
        for iterator in self.iterators.iter().flatten() {
            heap.mark_recursive(iterator.table);
        }
    }
}

impl Vm {
    /// Splits the VM into its heap and the root set over the rest.
    pub(crate) fn heap_and_roots(&mut self) -> (&mut Heap, RootSet<'_>) {
        let Vm {
            heap,
            registers,
            stack,
            memory_stack,
            cursor,
            program_memory,
            frames,
            iterators,
            ..
        } = self;
        (
            heap,
            RootSet {
                registers,
                stack,
                memory_stack,
                cursor,
                program_memory,
                frames,
                iterators,
            },
        )
    }
}

fn mark_value(heap: &mut Heap, value: &Value) {
    if let Some(id) = value.table_id() {
        heap.mark_recursive(id);
    }
}

/// A cursor keeps the table it points into alive; the value it names is
/// reached through that table.
fn mark_cursor(heap: &mut Heap, cursor: &Cursor) {
    if let Cursor::Entry(table, _) = cursor {
        heap.mark_recursive(*table);
    }
}

fn mark_children(heap: &mut Heap, id: TableId) {
    if !heap.is_live(id) {
        return;
    }
    let children: Vec<TableId> = heap
        .table(id)
        .values()
        .filter_map(Value::table_id)
        .collect();
    for child in children {
        heap.mark_recursive(child);
    }
}
