use std::collections::VecDeque;

use crate::storage::Transaction;

/// Undo and redo stacks of committed transactions.
#[derive(Debug)]
pub(crate) struct History {
    undo: VecDeque<Transaction>,
    redo: Vec<Transaction>,
    limit: usize,
}

impl History {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Records a new operator transaction; invalidates redo.
    pub(crate) fn record(&mut self, tx: Transaction) {
        self.redo.clear();
        self.push_undo(tx);
    }

    pub(crate) fn push_undo(&mut self, tx: Transaction) {
        self.undo.push_back(tx);
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
    }

    pub(crate) fn pop_undo(&mut self) -> Option<Transaction> {
        self.undo.pop_back()
    }

    pub(crate) fn push_redo(&mut self, tx: Transaction) {
        self.redo.push(tx);
    }

    pub(crate) fn pop_redo(&mut self) -> Option<Transaction> {
        self.redo.pop()
    }

    pub(crate) fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub(crate) fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub(crate) fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
