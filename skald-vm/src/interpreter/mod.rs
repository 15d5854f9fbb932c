//! The VM: registers, stacks, cursor machinery and the dispatch loop.

mod alu;
mod backtrace;
mod executors;
mod flow;
mod gc;
mod iterator;
mod memory;

use std::io::{self, BufRead, BufReader, Write};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use skald_asm::assembler::{command_table, OperandKind};
use skald_asm::{Opcode, Program};

use crate::consts::*;
use crate::error::{RuntimeFault, VmError};
use crate::external::NativeRegistry;
use crate::heap::{BlockKind, BlockRef, Heap, TableId};
use crate::sys::SysTable;
use crate::table::{hash_str, Key};
use crate::value::{format_number, Value};
use crate::NativeFn;

/// The VM's position in the value tree: the slot the `M*` opcodes read and
/// write through.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cursor {
    /// The program-memory cell.
    Root,
    /// The locals cell of a call frame.
    Frame(usize),
    /// A keyed slot inside a table.
    Entry(TableId, Key),
    /// A register holding a table, entered by key-through-register loads.
    Register(usize),
    /// A value-stack slot, entered by `MLOADS`.
    StackSlot(usize),
}

/// One call-stack entry.
pub(crate) struct CallFrame {
    /// Index of the `CALL` instruction, resumed past on `RET` and updated
    /// with the observed locals capacity.
    pub call_index: usize,
    /// The frame's locals table.
    pub locals: Value,
}

/// A live iterator: a frozen key list over a locked table.
pub(crate) struct TableIterator {
    pub table: TableId,
    pub keys: Vec<Key>,
    pub cursor: usize,
    /// Wrapper iterators yield values but report their keys as unset.
    pub is_wrapper: bool,
    pub block: BlockRef,
}

/// A loaded program together with all execution state.
pub struct Vm {
    program: Program,
    string_hashes: Vec<u32>,
    pc: usize,
    registers: [Value; VM_REGISTER_COUNT],
    stack: Vec<Value>,
    memory_stack: Vec<Cursor>,
    cursor: Cursor,
    parent: Value,
    program_memory: Value,
    frames: Vec<CallFrame>,
    iterators: Vec<Option<TableIterator>>,
    iterator_index: usize,
    heap: Heap,
    eval: bool,
    running: bool,
    sys: SysTable,
    natives: NativeRegistry,
    output: Box<dyn Write>,
    input: Box<dyn BufRead>,
    rng: StdRng,
    started: Instant,
}

impl Vm {
    /// Builds a VM around a program, with the console system commands
    /// installed and the invocation arguments exposed as `args`.
    pub fn new(program: Program, args: &[String]) -> Result<Self, VmError> {
        validate(&program)?;

        let heap_size = match program.heap_size_hint {
            0 => DEFAULT_HEAP_SIZE,
            hint => hint as usize,
        };
        let mut heap = Heap::new(heap_size);

        let root = heap
            .create_table(1, BlockKind::Table, |_| {})
            .map_err(fatal)?;
        let arg_table = heap
            .create_table(args.len().max(1), BlockKind::Table, |h| h.mark(root))
            .map_err(fatal)?;
        for (index, argument) in args.iter().enumerate() {
            heap.table_mut(arg_table)
                .insert(Key::Int(index as i64), Value::Str(argument.clone()));
        }
        heap.table_mut(root)
            .insert(Key::Str("args".into()), Value::Table(arg_table));
        let keep_both = |h: &mut Heap| {
            h.mark(root);
            h.mark(arg_table);
        };
        heap.sync_table_block(arg_table, keep_both).map_err(fatal)?;
        heap.sync_table_block(root, keep_both).map_err(fatal)?;

        let string_hashes = program.strings.iter().map(|s| hash_str(s)).collect();

        Ok(Self {
            program,
            string_hashes,
            pc: 0,
            registers: Default::default(),
            stack: Vec::new(),
            memory_stack: Vec::new(),
            cursor: Cursor::Root,
            parent: Value::Unset,
            program_memory: Value::Table(root),
            frames: Vec::new(),
            iterators: Vec::new(),
            iterator_index: 0,
            heap,
            eval: false,
            running: false,
            sys: SysTable::console(),
            natives: NativeRegistry::default(),
            output: Box::new(io::stdout()),
            input: Box::new(BufReader::new(io::stdin())),
            rng: StdRng::from_entropy(),
            started: Instant::now(),
        })
    }

    /// Redirects program output (`PLN`, dumps).
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    /// Redirects program input (`READ_LINE`).
    pub fn set_input(&mut self, input: Box<dyn BufRead>) {
        self.input = input;
    }

    /// Registers a native function resolvable through `FLOAD`.
    pub fn register_native(&mut self, name: impl Into<String>, function: NativeFn) {
        self.natives.register(name, function);
    }

    /// The system-command table, for hosts installing device functions.
    pub fn sys_table_mut(&mut self) -> &mut SysTable {
        &mut self.sys
    }

    /// The register file.
    pub fn registers(&self) -> &[Value] {
        &self.registers
    }

    /// Writes a register, for hosts seeding state before a run.
    pub fn set_register(&mut self, register: usize, value: Value) {
        self.registers[register] = value;
    }

    /// The value stack.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// The heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Mutable heap access, for natives building tables.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// The loaded program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Cooperative cancellation: the dispatch loop observes this before the
    /// next instruction.
    pub fn terminate(&mut self) {
        self.running = false;
    }

    /// Runs the program to completion.
    ///
    /// On a runtime error the returned message carries the
    /// `file:line[,line...]` trace of the faulting instruction and up to
    /// nine outer call frames. Allocator exhaustion aborts without cleanup;
    /// anything else releases iterator locks, frees call-frame locals and
    /// runs a final collection, leaving registers and stack inspectable.
    pub fn run(&mut self) -> Result<(), VmError> {
        self.running = true;
        self.started = Instant::now();

        let result = self.execute_loop();

        match result {
            Err(RuntimeFault::OutOfMemory(site)) => {
                // The heap may be mid-update; leave every structure as-is.
                Err(VmError::OutOfMemory(site))
            }
            Ok(()) => {
                self.finish(true);
                Ok(())
            }
            Err(RuntimeFault::Runtime(message)) => {
                let formatted = backtrace::format_runtime_error(
                    &self.program,
                    self.pc.saturating_sub(1),
                    &self.frames,
                    &message,
                );
                self.finish(false);
                Err(VmError::Runtime(formatted))
            }
        }
    }

    fn execute_loop(&mut self) -> Result<(), RuntimeFault> {
        while self.running {
            let Some(&instruction) = self.program.instructions.get(self.pc) else {
                return Err(RuntimeFault::runtime("Program counter out of range"));
            };
            self.pc += 1;
            if !self.instruction(instruction)?.should_continue() {
                break;
            }
        }
        Ok(())
    }

    fn finish(&mut self, success: bool) {
        debug!(
            success,
            elapsed_ms = self.elapsed_ms(),
            stack = self.stack.len(),
            memory_stack = self.memory_stack.len(),
            call_stack = self.frames.len(),
            iterator_stack = self.iterator_index,
            "vm: execution finished"
        );

        for slot in self.iterators.iter_mut() {
            if let Some(iterator) = slot.take() {
                if self.heap.is_live(iterator.table) {
                    let table = self.heap.table_mut(iterator.table);
                    table.lock = table.lock.saturating_sub(1);
                }
                self.heap.free(iterator.block);
            }
        }
        self.iterator_index = 0;

        // Frame locals must outlive the collection: the sweep walks their
        // children as roots.
        self.collect_garbage();

        for frame in std::mem::take(&mut self.frames) {
            if let Some(id) = frame.locals.table_id() {
                self.heap.free_table(id);
            }
        }

        self.heap.memory_report();
    }

    // ---- value helpers ----------------------------------------------------

    /// Renders a value for output and concatenation.
    pub fn display(&self, value: &Value) -> String {
        self.display_with(value, TO_STRING_DECIMALS)
    }

    pub(crate) fn display_with(&self, value: &Value, decimals: usize) -> String {
        match value {
            Value::Unset => "Unset".to_owned(),
            Value::Num(n) => format_number(*n, decimals),
            Value::Str(s) => s.clone(),
            Value::Label(l) => format!("Address: {l}"),
            Value::Table(id) => {
                if self.heap.is_live(*id) {
                    let table = self.heap.table(*id);
                    format!("Table: #{}, {}/{}", id.0, table.len(), table.capacity())
                } else {
                    format!("Table: #{}", id.0)
                }
            }
        }
    }

    /// Truthiness: non-zero number, non-empty string, resolved label,
    /// non-empty table; unset is false.
    pub(crate) fn truthy(&self, value: &Value) -> bool {
        match value {
            Value::Unset => false,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Label(l) => *l >= 0,
            Value::Table(id) => self.heap.is_live(*id) && !self.heap.table(*id).is_empty(),
        }
    }

    pub(crate) fn string_constant(&self, index: i32) -> Result<(&str, u32), RuntimeFault> {
        let index = index as usize;
        match self.program.strings.get(index) {
            Some(s) => Ok((s.as_str(), self.string_hashes[index])),
            None => Err(RuntimeFault::runtime("String constant out of range")),
        }
    }

    // ---- cursor helpers ---------------------------------------------------

    /// Reads the value behind a cursor.
    pub(crate) fn slot_value(&self, cursor: &Cursor) -> Result<Value, RuntimeFault> {
        Ok(match cursor {
            Cursor::Root => self.program_memory.clone(),
            Cursor::Frame(index) => self
                .frames
                .get(*index)
                .map(|f| f.locals.clone())
                .ok_or_else(|| RuntimeFault::runtime("Call stack is empty"))?,
            Cursor::Register(register) => self.registers[*register].clone(),
            Cursor::StackSlot(index) => self
                .stack
                .get(*index)
                .cloned()
                .ok_or_else(|| RuntimeFault::runtime("Stack is empty"))?,
            Cursor::Entry(table, key) => {
                if self.heap.is_live(*table) {
                    self.heap
                        .table(*table)
                        .get(key)
                        .cloned()
                        .unwrap_or(Value::Unset)
                } else {
                    Value::Unset
                }
            }
        })
    }

    /// Reads the value behind the current cursor.
    pub(crate) fn cursor_value(&self) -> Result<Value, RuntimeFault> {
        self.slot_value(&self.cursor)
    }

    /// Writes a value through a cursor.
    pub(crate) fn write_slot(&mut self, cursor: Cursor, value: Value) -> Result<(), RuntimeFault> {
        match cursor {
            Cursor::Root => self.program_memory = value,
            Cursor::Frame(index) => match self.frames.get_mut(index) {
                Some(frame) => frame.locals = value,
                None => return Err(RuntimeFault::runtime("Call stack is empty")),
            },
            Cursor::Register(register) => self.registers[register] = value,
            Cursor::StackSlot(index) => match self.stack.get_mut(index) {
                Some(slot) => *slot = value,
                None => return Err(RuntimeFault::runtime("Stack is empty")),
            },
            Cursor::Entry(table, key) => {
                if self.heap.is_live(table) {
                    *self.heap.table_mut(table).entry_or_unset(key) = value;
                    self.sync_table(table)?;
                }
            }
        }
        Ok(())
    }

    // ---- allocation with roots --------------------------------------------

    /// Creates a collectable table, collecting garbage on heap exhaustion.
    pub fn new_table(&mut self, capacity: usize) -> Result<TableId, RuntimeFault> {
        let (heap, roots) = self.heap_and_roots();
        heap.create_table(capacity, BlockKind::Table, |h| roots.mark(h))
    }

    /// Creates a non-collectable locals table for a call frame.
    pub(crate) fn new_locals_table(&mut self, capacity: usize) -> Result<TableId, RuntimeFault> {
        let (heap, roots) = self.heap_and_roots();
        heap.create_table(capacity, BlockKind::None, |h| roots.mark(h))
    }

    /// Re-charges a table's heap block after growth.
    pub(crate) fn sync_table(&mut self, id: TableId) -> Result<(), RuntimeFault> {
        let (heap, roots) = self.heap_and_roots();
        heap.sync_table_block(id, |h| roots.mark(h))
    }

    /// Allocates an auxiliary block (iterator snapshots).
    pub(crate) fn alloc_snapshot(&mut self, entries: usize) -> Result<BlockRef, RuntimeFault> {
        let (heap, roots) = self.heap_and_roots();
        heap.alloc_aux(crate::heap::snapshot_footprint(entries), |h| roots.mark(h))
    }

    /// Forces a collection cycle over the current root set.
    pub fn collect_garbage(&mut self) -> usize {
        let (heap, roots) = self.heap_and_roots();
        heap.collect(|h| roots.mark(h))
    }

    // ---- host plumbing ----------------------------------------------------

    pub(crate) fn write_output(&mut self, text: &str) {
        let _ = self.output.write_all(text.as_bytes());
        let _ = self.output.flush();
    }

    pub(crate) fn read_input_line(&mut self) -> String {
        let mut line = String::new();
        let _ = self.input.read_line(&mut line);
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        line
    }

    /// Uniform sample in `[0, 1)`.
    pub(crate) fn random(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    pub(crate) fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Milliseconds since the VM started running.
    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

fn fatal(fault: RuntimeFault) -> VmError {
    match fault {
        RuntimeFault::OutOfMemory(site) => VmError::OutOfMemory(site),
        RuntimeFault::Runtime(message) => VmError::Runtime(message),
    }
}

/// Load-time validation: register, string and label operands must be in
/// range, so the dispatch loop can index without checking.
fn validate(program: &Program) -> Result<(), VmError> {
    use hashbrown::HashMap;

    let mut kinds: HashMap<Opcode, (OperandKind, OperandKind)> = HashMap::new();
    for defs in command_table().values() {
        for def in defs {
            kinds.entry(def.opcode).or_insert((def.lparam, def.rparam));
        }
    }

    let check = |kind: OperandKind, value: i32| -> bool {
        match kind {
            OperandKind::Reg => (0..VM_REGISTER_COUNT as i32).contains(&value),
            OperandKind::Str => (0..program.strings.len() as i32).contains(&value),
            OperandKind::Lbl => (0..program.instructions.len() as i32).contains(&value),
            _ => true,
        }
    };

    for (index, instruction) in program.instructions.iter().enumerate() {
        let Some(&(lkind, rkind)) = kinds.get(&instruction.opcode) else {
            continue;
        };
        if !check(lkind, instruction.lparam.as_int())
            || !check(rkind, instruction.rparam.as_int())
        {
            return Err(VmError::Load(skald_asm::LoadError::Malformed(format!(
                "instruction {index}: operand out of range"
            ))));
        }
    }
    Ok(())
}
