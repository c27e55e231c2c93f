//! Transactions collected on the client side and committed as one batch.

use crate::item::Item;
use crate::wal::ModifyMode;

/// One buffered transaction step.
#[derive(Debug, Clone, PartialEq)]
pub struct TxStep {
    /// Item to write or delete.
    pub item: Item,
    /// Requested modification.
    pub mode: ModifyMode,
}

/// Ordered item modifications for one namespace.
///
/// Nothing is applied until the transaction is committed through the
/// namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    ns_name: String,
    steps: Vec<TxStep>,
}

impl Transaction {
    /// Starts a transaction against `ns_name`.
    pub fn new(ns_name: impl Into<String>) -> Self {
        Self {
            ns_name: ns_name.into(),
            steps: Vec::new(),
        }
    }

    /// Target namespace.
    #[must_use]
    pub fn ns_name(&self) -> &str {
        &self.ns_name
    }

    /// Buffers an insert.
    pub fn insert(&mut self, item: Item) {
        self.push(item, ModifyMode::Insert);
    }

    /// Buffers an update.
    pub fn update(&mut self, item: Item) {
        self.push(item, ModifyMode::Update);
    }

    /// Buffers an upsert.
    pub fn upsert(&mut self, item: Item) {
        self.push(item, ModifyMode::Upsert);
    }

    /// Buffers a delete.
    pub fn delete(&mut self, item: Item) {
        self.push(item, ModifyMode::Delete);
    }

    fn push(&mut self, item: Item, mode: ModifyMode) {
        self.steps.push(TxStep { item, mode });
    }

    /// Buffered steps.
    #[must_use]
    pub fn steps(&self) -> &[TxStep] {
        &self.steps
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true when nothing was buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Outcome of a committed transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxResult {
    /// Steps that changed the namespace.
    pub affected: usize,
    /// Whether the commit went through a namespace copy.
    pub copied: bool,
}
