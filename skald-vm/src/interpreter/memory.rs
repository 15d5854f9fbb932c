//! Cursor navigation: the `M*` opcode family.
//!
//! The cursor names a slot in the value tree; navigation descends through
//! table children, the memory-pointer stack saves and restores positions,
//! and a one-slot parent snapshot backs the `LPTBL` escape hatch.

use crate::consts::MEMORY_STACK_SIZE;
use crate::error::RuntimeFault;
use crate::heap::TableId;
use crate::table::Key;
use crate::value::Value;

use super::{Cursor, Vm};

impl Vm {
    pub(super) fn string_key(&self, index: i32) -> Result<Key, RuntimeFault> {
        Ok(Key::Str(self.string_constant(index)?.0.to_owned()))
    }

    /// The cursor's table, or the add/load error for the key being named.
    fn cursor_table(&self, action: &str, key: &Key) -> Result<TableId, RuntimeFault> {
        match self.cursor_value()? {
            Value::Table(id) => Ok(id),
            _ => Err(not_a_table(action, key)),
        }
    }

    // ---- madd -------------------------------------------------------------

    fn madd(&mut self, key: Key) -> Result<(TableId, Key), RuntimeFault> {
        let table = self.cursor_table("add", &key)?;
        self.heap.table_mut(table).entry_or_unset(key.clone());
        self.sync_table(table)?;
        Ok((table, key))
    }

    pub(super) fn op_madd_str(&mut self, index: i32) -> Result<(), RuntimeFault> {
        let (hash, key) = {
            let (text, hash) = self.string_constant(index)?;
            (hash, Key::Str(text.to_owned()))
        };
        let table = self.cursor_table("add", &key)?;
        self.heap
            .table_mut(table)
            .entry_or_unset_prehashed(hash, key);
        self.sync_table(table)
    }

    pub(super) fn op_madd_int(&mut self, value: i32) -> Result<(), RuntimeFault> {
        self.madd(Key::Int(value as i64)).map(|_| ())
    }

    pub(super) fn op_madd_reg(&mut self, register: usize) -> Result<(), RuntimeFault> {
        let key = self.register_key(register)?;
        self.madd(key).map(|_| ())
    }

    fn register_key(&self, register: usize) -> Result<Key, RuntimeFault> {
        match &self.registers[register] {
            Value::Str(s) => Ok(Key::Str(s.clone())),
            Value::Num(n) => Ok(Key::Int(*n as i64)),
            _ => Err(RuntimeFault::runtime(
                "Register contains no identifier or index",
            )),
        }
    }

    // ---- fused assignment target: madd + mload + mswap --------------------

    fn opt_mals(&mut self, key: Key) -> Result<(), RuntimeFault> {
        let (table, key) = self.madd(key)?;
        let child = Cursor::Entry(table, key);
        self.parent = self.slot_value(&child)?;
        let top = self
            .memory_stack
            .last_mut()
            .ok_or_else(|| RuntimeFault::runtime("Memory stack is empty"))?;
        self.cursor = std::mem::replace(top, child);
        Ok(())
    }

    pub(super) fn op_opt_mals_str(&mut self, index: i32) -> Result<(), RuntimeFault> {
        let key = self.string_key(index)?;
        self.opt_mals(key)
    }

    pub(super) fn op_opt_mals_int(&mut self, value: i32) -> Result<(), RuntimeFault> {
        self.opt_mals(Key::Int(value as i64))
    }

    pub(super) fn op_opt_mals_reg(&mut self, register: usize) -> Result<(), RuntimeFault> {
        let key = self.register_key(register)?;
        self.opt_mals(key)
    }

    // ---- mload ------------------------------------------------------------

    pub(super) fn op_mload_root(&mut self) -> Result<(), RuntimeFault> {
        self.parent = self.cursor_value()?;
        self.cursor = Cursor::Root;
        Ok(())
    }

    fn mload(&mut self, key: Key) -> Result<(), RuntimeFault> {
        let here = self.cursor_value()?;
        let Value::Table(table) = here else {
            return Err(not_a_table("load", &key));
        };
        if !self.heap.table(table).exists(&key) {
            return Err(not_found(&key));
        }
        self.parent = here;
        self.cursor = Cursor::Entry(table, key);
        Ok(())
    }

    pub(super) fn op_mload_str(&mut self, index: i32) -> Result<(), RuntimeFault> {
        let (hash, key) = {
            let (text, hash) = self.string_constant(index)?;
            (hash, Key::Str(text.to_owned()))
        };
        let here = self.cursor_value()?;
        let Value::Table(table) = here else {
            return Err(not_a_table("load", &key));
        };
        if self.heap.table(table).get_prehashed(hash, &key).is_none() {
            return Err(not_found(&key));
        }
        self.parent = here;
        self.cursor = Cursor::Entry(table, key);
        Ok(())
    }

    pub(super) fn op_mload_int(&mut self, value: i32) -> Result<(), RuntimeFault> {
        self.mload(Key::Int(value as i64))
    }

    pub(super) fn op_mload_reg(&mut self, register: usize) -> Result<(), RuntimeFault> {
        // A table in the register becomes the cursor itself; a string or
        // number descends by key.
        if let Value::Table(_) = self.registers[register] {
            self.parent = self.cursor_value()?;
            self.cursor = Cursor::Register(register);
            return Ok(());
        }
        let key = self.register_key(register)?;
        self.mload(key)
    }

    pub(super) fn op_mloads(&mut self) -> Result<(), RuntimeFault> {
        if self.stack.is_empty() {
            return Err(RuntimeFault::runtime("Stack is empty"));
        }
        self.parent = self.cursor_value()?;
        self.cursor = Cursor::StackSlot(self.stack.len() - 1);
        Ok(())
    }

    // ---- mset / mget ------------------------------------------------------

    pub(super) fn op_mset(&mut self, value: Value) -> Result<(), RuntimeFault> {
        self.write_slot(self.cursor.clone(), value)
    }

    pub(super) fn op_mget(&mut self, register: usize) -> Result<(), RuntimeFault> {
        self.registers[register] = self.cursor_value()?;
        Ok(())
    }

    /// Fused assignment: write through the saved slot and pop it.
    pub(super) fn op_opt_mssp(&mut self, register: usize) -> Result<(), RuntimeFault> {
        let target = self
            .memory_stack
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Memory stack is empty"))?;
        let value = self.registers[register].clone();
        self.parent = value.clone();
        self.write_slot(target, value)
    }

    pub(super) fn op_lptbl(&mut self, register: usize) {
        // The parent snapshot is not a GC root, so it may name a table a
        // collection has since reclaimed; such a parent reads as unset.
        let blocked = match (&self.parent, &self.program_memory) {
            (Value::Table(parent), _) if !self.heap.is_live(*parent) => true,
            (Value::Table(parent), Value::Table(root)) if parent == root => true,
            (Value::Table(parent), _) => self
                .frames
                .last()
                .and_then(|frame| frame.locals.table_id())
                .is_some_and(|locals| locals == *parent),
            _ => true,
        };
        self.registers[register] = if blocked {
            Value::Unset
        } else {
            self.parent.clone()
        };
    }

    // ---- memory-pointer stack ---------------------------------------------

    pub(super) fn op_mpush(&mut self) -> Result<(), RuntimeFault> {
        if self.memory_stack.len() >= MEMORY_STACK_SIZE {
            return Err(RuntimeFault::runtime("Memory stack limit reached"));
        }
        self.memory_stack.push(self.cursor.clone());
        Ok(())
    }

    pub(super) fn op_mpop(&mut self) -> Result<(), RuntimeFault> {
        let saved = self
            .memory_stack
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Memory stack is empty"))?;
        self.parent = self.cursor_value()?;
        self.cursor = saved;
        Ok(())
    }

    pub(super) fn op_mswap(&mut self) -> Result<(), RuntimeFault> {
        self.parent = self.cursor_value()?;
        let top = self
            .memory_stack
            .last_mut()
            .ok_or_else(|| RuntimeFault::runtime("Memory stack is empty"))?;
        std::mem::swap(top, &mut self.cursor);
        Ok(())
    }

    // ---- mdel -------------------------------------------------------------

    pub(super) fn op_mdel(&mut self, key: Key) -> Result<(), RuntimeFault> {
        let Value::Table(table) = self.cursor_value()? else {
            return Err(RuntimeFault::runtime("Variable is not a table"));
        };
        let table = self.heap.table_mut(table);
        if table.lock > 0 {
            return Err(RuntimeFault::runtime("Table is locked"));
        }
        table.remove(&key);
        Ok(())
    }

    pub(super) fn op_mdel_reg(&mut self, register: usize) -> Result<(), RuntimeFault> {
        let key = self.register_key(register)?;
        self.op_mdel(key)
    }

    // ---- fused variable loads ---------------------------------------------

    pub(super) fn op_opt_loadsinglevar(
        &mut self,
        register: usize,
        index: i32,
        global: bool,
    ) -> Result<(), RuntimeFault> {
        let (hash, key) = {
            let (text, hash) = self.string_constant(index)?;
            (hash, Key::Str(text.to_owned()))
        };
        let source = if global {
            self.program_memory.clone()
        } else {
            self.cursor_value()?
        };
        let Value::Table(table) = source else {
            return Err(not_a_table("load", &key));
        };
        let value = self
            .heap
            .table(table)
            .get_prehashed(hash, &key)
            .cloned()
            .ok_or_else(|| not_found(&key))?;
        self.parent = value.clone();
        self.registers[register] = value;
        Ok(())
    }

    /// Function prologue: pop a call argument into a named local slot.
    pub(super) fn op_opt_loadparam(&mut self, index: i32) -> Result<(), RuntimeFault> {
        let (hash, key) = {
            let (text, hash) = self.string_constant(index)?;
            (hash, Key::Str(text.to_owned()))
        };
        let table = self.cursor_table("add", &key)?;
        let value = self
            .stack
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Stack is empty"))?;
        *self
            .heap
            .table_mut(table)
            .entry_or_unset_prehashed(hash, key) = value;
        self.sync_table(table)
    }

    // ---- dumps ------------------------------------------------------------

    pub(super) fn op_mdump(&mut self) -> Result<(), RuntimeFault> {
        let value = self.cursor_value()?;
        if let Value::Table(id) = value {
            self.write_output("MEMORY\n");
            let dump = self.dump_table(id, 2);
            self.write_output(&dump);
        }
        Ok(())
    }

    pub(super) fn op_rdump(&mut self) {
        self.write_output("REGISTERS\n");
        let lines: String = (0..self.registers.len())
            .map(|i| format!("  {i}: {}\n", self.describe(&self.registers[i])))
            .collect();
        self.write_output(&lines);
    }

    pub(super) fn op_sdump(&mut self) {
        self.write_output(&format!("STACK ({})\n", self.stack.len()));
        let lines: String = self
            .stack
            .iter()
            .enumerate()
            .rev()
            .map(|(i, value)| format!("  {i}: {}\n", self.describe(value)))
            .collect();
        self.write_output(&lines);
    }

    fn describe(&self, value: &Value) -> String {
        match value {
            Value::Unset => "UNSET".to_owned(),
            Value::Num(n) => format!("NUM, {n:.8}"),
            Value::Str(s) => format!("STR, {s:?}"),
            Value::Label(l) => format!("LBL, {l}"),
            Value::Table(id) => {
                if self.heap.is_live(*id) {
                    format!("TBL, {} entries (#{})", self.heap.table(*id).len(), id.0)
                } else {
                    format!("TBL, dead (#{})", id.0)
                }
            }
        }
    }

    fn dump_table(&self, id: TableId, indent: usize) -> String {
        let mut out = String::new();
        // Tables may be cyclic; cap the depth instead of chasing the cycle.
        if indent > 32 {
            out.push_str(&format!("{:indent$}...\n", ""));
            return out;
        }
        for (key, value) in self.heap.table(id).iter() {
            let name = match key {
                Key::Str(s) => s.clone(),
                Key::Int(i) => i.to_string(),
            };
            out.push_str(&format!(
                "{:indent$}{name}: {}\n",
                "",
                self.describe(value)
            ));
            if let Value::Table(child) = value {
                if self.heap.is_live(*child) {
                    out.push_str(&self.dump_table(*child, indent + 1));
                }
            }
        }
        out
    }
}

fn key_text(key: &Key) -> String {
    match key {
        Key::Str(s) => format!("identifier '{s}'"),
        Key::Int(i) => format!("index {i}"),
    }
}

fn not_a_table(action: &str, key: &Key) -> RuntimeFault {
    RuntimeFault::runtime(format!(
        "Can't {action} {}, parent is not a table",
        key_text(key)
    ))
}

fn not_found(key: &Key) -> RuntimeFault {
    match key {
        Key::Str(s) => RuntimeFault::runtime(format!("Identifier '{s}' not found")),
        Key::Int(i) => RuntimeFault::runtime(format!("Index {i} not found")),
    }
}
