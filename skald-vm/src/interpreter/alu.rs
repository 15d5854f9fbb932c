//! Register and stack arithmetic, comparison and conversion opcodes.
//!
//! Coercion is pointwise per the operator tables: `=`/`<>` coerce a string
//! against a number, the orderings compare two strings lexicographically and
//! any number/string mix numerically, `+` concatenates when either side is a
//! string, and the remaining arithmetic coerces both sides to numbers with
//! unset reading as zero.

use hashbrown::HashMap;

use crate::consts::STACK_SIZE;
use crate::error::RuntimeFault;
use crate::heap::TableId;
use crate::table::Key;
use crate::value::Value;

use super::Vm;

/// Comparison operator selecting a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Floored modulo: `x - floor(x/y)*y`.
fn modulo(x: f64, y: f64) -> f64 {
    x - (x / y).floor() * y
}

/// Equality under the `=` operator's coercion rules.
fn loose_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Num(x), Value::Str(_)) => *x == b.to_number(),
        (Value::Str(_), Value::Num(y)) => a.to_number() == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Label(x), Value::Label(y)) => x == y,
        (Value::Table(x), Value::Table(y)) => x == y,
        (Value::Unset, Value::Unset) => true,
        _ => false,
    }
}

/// Ordering under `<`-family coercion: any number/string mix compares
/// numerically, two strings lexicographically, anything else is undefined
/// and every ordering operator yields false.
fn loose_order(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Num(_) | Value::Str(_), Value::Num(_) | Value::Str(_)) => {
            a.to_number().partial_cmp(&b.to_number())
        }
        _ => None,
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> bool {
    match op {
        CmpOp::Eq => loose_equal(a, b),
        CmpOp::Ne => !loose_equal(a, b),
        CmpOp::Lt => loose_order(a, b) == Some(std::cmp::Ordering::Less),
        CmpOp::Gt => loose_order(a, b) == Some(std::cmp::Ordering::Greater),
        CmpOp::Le => matches!(
            loose_order(a, b),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        ),
        CmpOp::Ge => matches!(
            loose_order(a, b),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ),
    }
}

impl Vm {
    fn bool_value(result: bool) -> Value {
        Value::Num(if result { 1.0 } else { 0.0 })
    }

    /// Coerces a register to a number in place and returns it.
    fn coerce_number(&mut self, register: usize) -> f64 {
        let n = self.registers[register].to_number();
        self.registers[register] = Value::Num(n);
        n
    }

    // ---- stack ------------------------------------------------------------

    pub(super) fn op_push(&mut self, value: Value) -> Result<(), RuntimeFault> {
        if self.stack.len() >= STACK_SIZE {
            return Err(RuntimeFault::runtime("Stack limit reached"));
        }
        self.stack.push(value);
        Ok(())
    }

    pub(super) fn op_pop(&mut self, register: usize) -> Result<(), RuntimeFault> {
        let value = self
            .stack
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Stack is empty"))?;
        self.registers[register] = value;
        Ok(())
    }

    pub(super) fn op_swap(&mut self, register: usize) -> Result<(), RuntimeFault> {
        let top = self
            .stack
            .last_mut()
            .ok_or_else(|| RuntimeFault::runtime("Stack is empty"))?;
        std::mem::swap(&mut self.registers[register], top);
        Ok(())
    }

    /// Moves the left register into the right, then pops into the left.
    pub(super) fn op_spop(&mut self, left: usize, right: usize) -> Result<(), RuntimeFault> {
        let value = self
            .stack
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Stack is empty"))?;
        self.registers[right] = self.registers[left].clone();
        self.registers[left] = value;
        Ok(())
    }

    // ---- logic ------------------------------------------------------------

    pub(super) fn op_or(&mut self, left: usize, right: usize) {
        let result = self.truthy(&self.registers[left]) || self.truthy(&self.registers[right]);
        self.registers[left] = Self::bool_value(result);
    }

    pub(super) fn op_and(&mut self, left: usize, right: usize) {
        let result = self.truthy(&self.registers[left]) && self.truthy(&self.registers[right]);
        self.registers[left] = Self::bool_value(result);
    }

    pub(super) fn op_por(&mut self) -> Result<(), RuntimeFault> {
        let popped = self
            .stack
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Stack is empty"))?;
        let result = self.truthy(&popped) || self.truthy(&self.registers[0]);
        self.registers[0] = Self::bool_value(result);
        Ok(())
    }

    pub(super) fn op_pand(&mut self) -> Result<(), RuntimeFault> {
        let popped = self
            .stack
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Stack is empty"))?;
        let result = self.truthy(&popped) && self.truthy(&self.registers[0]);
        self.registers[0] = Self::bool_value(result);
        Ok(())
    }

    pub(super) fn op_not(&mut self, register: usize) {
        let result = !self.truthy(&self.registers[register]);
        self.registers[register] = Self::bool_value(result);
    }

    // ---- comparison -------------------------------------------------------

    pub(super) fn op_compare(&mut self, left: usize, right: usize, op: CmpOp) {
        let result = compare(op, &self.registers[left], &self.registers[right]);
        self.registers[left] = Self::bool_value(result);
    }

    /// Popped value against register 0, result in register 0.
    pub(super) fn op_sp_compare(&mut self, op: CmpOp) -> Result<(), RuntimeFault> {
        let popped = self
            .stack
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Stack is empty"))?;
        let result = compare(op, &popped, &self.registers[0]);
        self.registers[0] = Self::bool_value(result);
        Ok(())
    }

    // ---- arithmetic -------------------------------------------------------

    fn arith_values(&self, op: ArithOp, left: &Value, right: &Value) -> Value {
        if op == ArithOp::Add
            && (matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)))
        {
            let mut text = self.display(left);
            text.push_str(&self.display(right));
            return Value::Str(text);
        }
        let x = left.to_number();
        let y = right.to_number();
        Value::Num(match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            ArithOp::Mod => modulo(x, y),
        })
    }

    pub(super) fn op_arith(&mut self, left: usize, right: usize, op: ArithOp) {
        let result = self.arith_values(op, &self.registers[left], &self.registers[right]);
        self.registers[left] = result;
    }

    /// Popped value with register 0 on the right, result in register 0.
    pub(super) fn op_sp_arith(&mut self, op: ArithOp) -> Result<(), RuntimeFault> {
        let popped = self
            .stack
            .pop()
            .ok_or_else(|| RuntimeFault::runtime("Stack is empty"))?;
        let result = self.arith_values(op, &popped, &self.registers[0]);
        self.registers[0] = result;
        Ok(())
    }

    pub(super) fn op_math1(&mut self, register: usize, f: impl Fn(f64) -> f64) {
        let n = self.coerce_number(register);
        self.registers[register] = Value::Num(f(n));
    }

    pub(super) fn op_math2(
        &mut self,
        left: usize,
        right: usize,
        f: impl Fn(f64, f64) -> f64,
    ) {
        let x = self.coerce_number(left);
        let y = self.coerce_number(right);
        self.registers[left] = Value::Num(f(x, y));
    }

    // ---- conversion -------------------------------------------------------

    pub(super) fn op_str_rr(&mut self, left: usize, right: usize) {
        self.registers[left] = Value::Str(self.display(&self.registers[right]));
    }

    pub(super) fn op_str_r(&mut self, register: usize) {
        if !matches!(self.registers[register], Value::Str(_)) {
            self.registers[register] = Value::Str(self.display(&self.registers[register]));
        }
    }

    pub(super) fn op_num_rr(&mut self, left: usize, right: usize) {
        self.registers[left] = Value::Num(self.registers[right].to_number());
    }

    pub(super) fn op_num_r(&mut self, register: usize) {
        self.coerce_number(register);
    }

    pub(super) fn op_size(&mut self, left: usize, right: usize) {
        let size = match &self.registers[right] {
            Value::Num(_) | Value::Str(_) => 1.0,
            Value::Label(l) => {
                if *l >= 0 {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Table(id) => {
                if self.heap.is_live(*id) {
                    self.heap.table(*id).len() as f64
                } else {
                    0.0
                }
            }
            Value::Unset => 0.0,
        };
        self.registers[left] = Value::Num(size);
    }

    pub(super) fn op_len(&mut self, left: usize, right: usize) {
        let length = match &self.registers[right] {
            Value::Str(s) => s.chars().count(),
            other => self.display(other).chars().count(),
        };
        self.registers[left] = Value::Num(length as f64);
    }

    pub(super) fn op_type(&mut self, left: usize, right: usize) {
        let tag = self.registers[right].kind_tag();
        self.registers[left] = Value::Num(f64::from(tag));
    }

    pub(super) fn op_ctbl(&mut self, register: usize) -> Result<(), RuntimeFault> {
        let id = self.new_table(1)?;
        self.registers[register] = Value::Table(id);
        Ok(())
    }

    // ---- deep copy --------------------------------------------------------

    /// Deep copy with cycle preservation: each source table is copied once
    /// and every further reference is rewired to the same copy.
    pub(super) fn op_cpy(&mut self, left: usize, right: usize) -> Result<(), RuntimeFault> {
        match self.registers[right].clone() {
            Value::Table(source) => {
                let capacity = self.heap.table(source).capacity();
                let copy = self.new_table(capacity)?;
                // The copy must be rooted before any nested allocation can
                // trigger a collection.
                self.registers[left] = Value::Table(copy);
                let mut copied = HashMap::new();
                copied.insert(source, copy);
                self.copy_entries(source, copy, &mut copied)
            }
            other => {
                self.registers[left] = other;
                Ok(())
            }
        }
    }

    fn copy_entries(
        &mut self,
        source: TableId,
        destination: TableId,
        copied: &mut HashMap<TableId, TableId>,
    ) -> Result<(), RuntimeFault> {
        let entries: Vec<(Key, Value)> = self
            .heap
            .table(source)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (key, value) in entries {
            match value {
                Value::Table(child) => {
                    if let Some(&existing) = copied.get(&child) {
                        self.heap
                            .table_mut(destination)
                            .insert(key, Value::Table(existing));
                        self.sync_table(destination)?;
                    } else {
                        let capacity = self.heap.table(child).capacity();
                        let child_copy = self.new_table(capacity)?;
                        // Rooted through the destination entry before
                        // recursing, like the root copy above.
                        self.heap
                            .table_mut(destination)
                            .insert(key, Value::Table(child_copy));
                        self.sync_table(destination)?;
                        copied.insert(child, child_copy);
                        self.copy_entries(child, child_copy, copied)?;
                    }
                }
                other => {
                    self.heap.table_mut(destination).insert(key, other);
                    self.sync_table(destination)?;
                }
            }
        }
        Ok(())
    }
}
