//! # Store
//!
//! Storage seam shared by every entity.
//!
//! ## Model
//!
//! - Documents are hashes, one field per top-level attribute, each value JSON encoded
//! - Integer fields are plain JSON numbers, so `HINCRBY` works on them in place
//! - Reference sets (project investors) are sets
//! - Ordered references and appended records (founder projects, bill analyses) are lists
//!
//! ## Atomicity
//!
//! - Single field increments are atomic on their own
//! - Multi-document writes go through a [`WriteBatch`], committed all-or-nothing
//! - Redis: `MULTI/EXEC` pipeline, memory: one lock over a copy of the data
use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    PutFields {
        key: String,
        fields: Vec<(String, String)>,
    },
    RemoveFields {
        key: String,
        fields: Vec<String>,
    },
    Increment {
        key: String,
        field: String,
        delta: i64,
    },
    IncrementFloat {
        key: String,
        field: String,
        delta: f64,
    },
    AddMember {
        key: String,
        member: String,
    },
    Append {
        key: String,
        value: String,
    },
    Delete {
        key: String,
    },
}

/// Pending writes committed together by [`Store::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_fields(&mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> &mut Self {
        if !fields.is_empty() {
            self.ops.push(Op::PutFields {
                key: key.into(),
                fields,
            });
        }
        self
    }

    pub fn put_field(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.put_fields(key, vec![(field.into(), value.into())])
    }

    pub fn remove_field(&mut self, key: impl Into<String>, field: impl Into<String>) -> &mut Self {
        self.ops.push(Op::RemoveFields {
            key: key.into(),
            fields: vec![field.into()],
        });
        self
    }

    pub fn increment(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        delta: i64,
    ) -> &mut Self {
        self.ops.push(Op::Increment {
            key: key.into(),
            field: field.into(),
            delta,
        });
        self
    }

    pub fn increment_float(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        delta: f64,
    ) -> &mut Self {
        self.ops.push(Op::IncrementFloat {
            key: key.into(),
            field: field.into(),
            delta,
        });
        self
    }

    pub fn add_member(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(Op::AddMember {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(Op::Append {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(Op::Delete { key: key.into() });
        self
    }

    pub fn extend(&mut self, other: WriteBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// All fields of a hash, empty when the key is absent.
    async fn fields(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn field(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Set members, sorted.
    async fn members(&self, key: &str) -> Result<Vec<String>>;

    /// List items in insertion order.
    async fn items(&self, key: &str) -> Result<Vec<String>>;

    /// Atomic add on one hash field, a missing field counts as zero. Returns the new value.
    async fn increment(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    async fn increment_float(&self, key: &str, field: &str, delta: f64) -> Result<f64>;

    /// Sets a hash field only when it is absent. Returns false when it was already taken.
    async fn claim(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    /// Applies every op in the batch or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fields_are_skipped() {
        let mut batch = WriteBatch::new();
        batch.put_fields("project:1", Vec::new());

        assert!(batch.is_empty());
    }

    #[test]
    fn test_batch_keeps_order() {
        let mut batch = WriteBatch::new();
        batch
            .increment("investor:a", "totFunds", 600)
            .remove_field("investor:a:investments", "p1")
            .delete("project:p1:investors");

        let ops = batch.into_ops();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], Op::Increment { delta: 600, .. }));
        assert!(matches!(ops[2], Op::Delete { .. }));
    }
}
