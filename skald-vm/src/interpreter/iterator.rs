//! Table iterators.
//!
//! `ILOAD` freezes the entry order of the cursor's table and locks it
//! against deletion; values are read through the table at access time, so
//! in-place updates stay visible while the entry set cannot change.
//! Wrapper iterators (explicit operand on `ILOAD`) yield values but report
//! their keys as unset.

use crate::consts::ITERATOR_STACK_SIZE;
use crate::error::RuntimeFault;
use crate::table::Key;
use crate::value::Value;

use super::{TableIterator, Vm};

impl Vm {
    fn iterator(&self) -> Result<&TableIterator, RuntimeFault> {
        self.iterators
            .get(self.iterator_index)
            .and_then(Option::as_ref)
            .ok_or_else(|| RuntimeFault::runtime("No iterator loaded"))
    }

    pub(super) fn op_iload(&mut self, wrapper: bool) -> Result<(), RuntimeFault> {
        let Value::Table(table) = self.cursor_value()? else {
            return Err(RuntimeFault::runtime("Variable is not a table"));
        };

        let keys = self.heap.table(table).keys_snapshot();
        let block = self.alloc_snapshot(keys.len())?;

        if self.iterators.len() <= self.iterator_index {
            self.iterators
                .resize_with(self.iterator_index + 1, || None);
        }
        // Replacing a still-loaded iterator releases its lock first.
        if let Some(old) = self.iterators[self.iterator_index].take() {
            self.release(old);
        }

        self.heap.table_mut(table).lock += 1;
        self.iterators[self.iterator_index] = Some(TableIterator {
            table,
            keys,
            cursor: 0,
            is_wrapper: wrapper,
            block,
        });
        Ok(())
    }

    pub(super) fn op_ihas(&mut self) -> Result<(), RuntimeFault> {
        let iterator = self.iterator()?;
        self.eval = iterator.cursor < iterator.keys.len();
        Ok(())
    }

    pub(super) fn op_ival(&mut self, register: usize) -> Result<(), RuntimeFault> {
        let iterator = self.iterator()?;
        let key = iterator
            .keys
            .get(iterator.cursor)
            .ok_or_else(|| RuntimeFault::runtime("Iterator is exhausted"))?;
        let value = self
            .heap
            .table(iterator.table)
            .get(key)
            .cloned()
            .unwrap_or(Value::Unset);
        self.registers[register] = value;
        Ok(())
    }

    pub(super) fn op_ikey(&mut self, register: usize) -> Result<(), RuntimeFault> {
        let iterator = self.iterator()?;
        let value = if iterator.is_wrapper {
            Value::Unset
        } else {
            match iterator
                .keys
                .get(iterator.cursor)
                .ok_or_else(|| RuntimeFault::runtime("Iterator is exhausted"))?
            {
                Key::Str(s) => Value::Str(s.clone()),
                Key::Int(i) => Value::Num(*i as f64),
            }
        };
        self.registers[register] = value;
        Ok(())
    }

    pub(super) fn op_ipush(&mut self) -> Result<(), RuntimeFault> {
        if self.iterator_index + 1 >= ITERATOR_STACK_SIZE {
            return Err(RuntimeFault::runtime("Iterator stack limit reached"));
        }
        self.iterator_index += 1;
        Ok(())
    }

    pub(super) fn op_ipop(&mut self) -> Result<(), RuntimeFault> {
        if self.iterator_index == 0 {
            return Err(RuntimeFault::runtime("Iterator stack is empty"));
        }
        self.iterator_index -= 1;
        Ok(())
    }

    pub(super) fn op_istep(&mut self) -> Result<(), RuntimeFault> {
        let slot = self
            .iterators
            .get_mut(self.iterator_index)
            .and_then(Option::as_mut)
            .ok_or_else(|| RuntimeFault::runtime("No iterator loaded"))?;
        slot.cursor += 1;
        Ok(())
    }

    pub(super) fn op_idel(&mut self) {
        if let Some(slot) = self.iterators.get_mut(self.iterator_index) {
            if let Some(iterator) = slot.take() {
                self.release(iterator);
            }
        }
    }

    fn release(&mut self, iterator: TableIterator) {
        if self.heap.is_live(iterator.table) {
            let table = self.heap.table_mut(iterator.table);
            table.lock = table.lock.saturating_sub(1);
        }
        self.heap.free(iterator.block);
    }
}
