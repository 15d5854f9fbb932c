//! Name-indexed registry for native extension functions.

use crate::NativeFn;

/// Registered native functions, resolved to indices by `FLOAD`.
///
/// Extensions register under a name at startup; a running program turns the
/// name into a stable index once and calls through it from then on.
#[derive(Default)]
pub struct NativeRegistry {
    entries: Vec<(String, NativeFn)>,
}

impl NativeRegistry {
    /// Registers `function` under `name`.
    ///
    /// A later registration under the same name shadows the earlier one for
    /// new lookups; already-resolved indices keep their function.
    pub fn register(&mut self, name: impl Into<String>, function: NativeFn) {
        self.entries.push((name.into(), function));
    }

    /// Resolves a name to its index.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().rposition(|(n, _)| n == name)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn take(&mut self, index: usize) -> Option<(String, NativeFn)> {
        if index < self.entries.len() {
            let name = self.entries[index].0.clone();
            let placeholder: NativeFn = Box::new(|_, _| Ok(crate::Value::Unset));
            let function = std::mem::replace(&mut self.entries[index].1, placeholder);
            Some((name, function))
        } else {
            None
        }
    }

    pub(crate) fn put_back(&mut self, index: usize, function: NativeFn) {
        self.entries[index].1 = function;
    }
}
