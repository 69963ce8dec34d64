//! Conflation window: append-only buffer drained once per cycle

use crate::types::UpdateOperation;

/// Operations accumulated since the last flush, in arrival order
#[derive(Debug, Default)]
pub struct ConflationWindow {
    operations: Vec<UpdateOperation>,
}

impl ConflationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one operation
    pub fn push(&mut self, operation: UpdateOperation) {
        self.operations.push(operation);
    }

    /// Append many operations, preserving their order
    pub fn extend<I: IntoIterator<Item = UpdateOperation>>(&mut self, operations: I) {
        self.operations.extend(operations);
    }

    /// Take every buffered operation, leaving the window empty
    pub fn drain(&mut self) -> Vec<UpdateOperation> {
        std::mem::take(&mut self.operations)
    }

    /// Discard buffered operations, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.operations.len();
        self.operations.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
