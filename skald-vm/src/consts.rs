//! VM parameters.

/// Number of general-purpose registers.
pub const VM_REGISTER_COUNT: usize = 10;

/// Value stack capacity in slots.
pub const STACK_SIZE: usize = 65536;

/// Memory-pointer stack capacity in slots.
pub const MEMORY_STACK_SIZE: usize = 65536;

/// Call stack capacity in frames.
pub const CALL_STACK_SIZE: usize = 16384;

/// Iterator stack capacity in slots.
pub const ITERATOR_STACK_SIZE: usize = 16384;

/// Heap bucket size used when the program carries no hint.
pub const DEFAULT_HEAP_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on allocator buckets; exhaustion past this is fatal.
pub const MAX_BUCKETS: usize = 5;

/// Decimal digits kept when a number is coerced to a string.
pub const TO_STRING_DECIMALS: usize = 8;

/// Outer call-stack frames reported in a runtime error trace.
pub const TRACE_FRAMES: usize = 9;
