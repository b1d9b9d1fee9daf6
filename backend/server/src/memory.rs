//! In-process [`Store`] with the same semantics as Redis, used by tests.
use std::collections::{BTreeSet, HashMap};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::store::{Op, Store, WriteBatch};

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
    List(Vec<String>),
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn hash_mut<'a>(data: &'a mut HashMap<String, Value>, key: &str) -> Result<&'a mut HashMap<String, String>> {
    match data
        .entry(key.to_string())
        .or_insert_with(|| Value::Hash(HashMap::new()))
    {
        Value::Hash(hash) => Ok(hash),
        _ => bail!("WRONGTYPE {key} is not a hash"),
    }
}

fn add_int(hash: &mut HashMap<String, String>, field: &str, delta: i64) -> Result<i64> {
    let current = match hash.get(field) {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| anyhow!("hash value at {field} is not an integer"))?,
        None => 0,
    };

    let next = current
        .checked_add(delta)
        .ok_or_else(|| anyhow!("increment or decrement would overflow"))?;
    hash.insert(field.to_string(), next.to_string());

    Ok(next)
}

fn add_float(hash: &mut HashMap<String, String>, field: &str, delta: f64) -> Result<f64> {
    let current = match hash.get(field) {
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| anyhow!("hash value at {field} is not a float"))?,
        None => 0.0,
    };

    let next = current + delta;
    hash.insert(field.to_string(), next.to_string());

    Ok(next)
}

fn apply(data: &mut HashMap<String, Value>, op: Op) -> Result<()> {
    match op {
        Op::PutFields { key, fields } => {
            hash_mut(data, &key)?.extend(fields);
        }
        Op::RemoveFields { key, fields } => {
            if let Some(Value::Hash(hash)) = data.get_mut(&key) {
                for field in fields {
                    hash.remove(&field);
                }
            }
        }
        Op::Increment { key, field, delta } => {
            add_int(hash_mut(data, &key)?, &field, delta)?;
        }
        Op::IncrementFloat { key, field, delta } => {
            add_float(hash_mut(data, &key)?, &field, delta)?;
        }
        Op::AddMember { key, member } => {
            match data
                .entry(key.clone())
                .or_insert_with(|| Value::Set(BTreeSet::new()))
            {
                Value::Set(set) => {
                    set.insert(member);
                }
                _ => bail!("WRONGTYPE {key} is not a set"),
            }
        }
        Op::Append { key, value } => {
            match data
                .entry(key.clone())
                .or_insert_with(|| Value::List(Vec::new()))
            {
                Value::List(list) => list.push(value),
                _ => bail!("WRONGTYPE {key} is not a list"),
            }
        }
        Op::Delete { key } => {
            data.remove(&key);
        }
    }

    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn fields(&self, key: &str) -> Result<HashMap<String, String>> {
        match self.data.lock().await.get(key) {
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => bail!("WRONGTYPE {key} is not a hash"),
            None => Ok(HashMap::new()),
        }
    }

    async fn field(&self, key: &str, field: &str) -> Result<Option<String>> {
        match self.data.lock().await.get(key) {
            Some(Value::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(_) => bail!("WRONGTYPE {key} is not a hash"),
            None => Ok(None),
        }
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        match self.data.lock().await.get(key) {
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => bail!("WRONGTYPE {key} is not a set"),
            None => Ok(Vec::new()),
        }
    }

    async fn items(&self, key: &str) -> Result<Vec<String>> {
        match self.data.lock().await.get(key) {
            Some(Value::List(list)) => Ok(list.clone()),
            Some(_) => bail!("WRONGTYPE {key} is not a list"),
            None => Ok(Vec::new()),
        }
    }

    async fn increment(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut data = self.data.lock().await;
        add_int(hash_mut(&mut data, key)?, field, delta)
    }

    async fn increment_float(&self, key: &str, field: &str, delta: f64) -> Result<f64> {
        let mut data = self.data.lock().await;
        add_float(hash_mut(&mut data, key)?, field, delta)
    }

    async fn claim(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut data = self.data.lock().await;
        let hash = hash_mut(&mut data, key)?;
        if hash.contains_key(field) {
            return Ok(false);
        }

        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut data = self.data.lock().await;

        // Work on a copy so a failing op leaves nothing behind.
        let mut staged = data.clone();
        for op in batch.into_ops() {
            apply(&mut staged, op)?;
        }
        *data = staged;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_missing_field_starts_at_zero() {
        let store = MemoryStore::new();

        assert_eq!(store.increment("project:1", "raisedAmount", 5).await.unwrap(), 5);
        assert_eq!(store.increment("project:1", "raisedAmount", -2).await.unwrap(), 3);
        assert_eq!(
            store.field("project:1", "raisedAmount").await.unwrap(),
            Some("3".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_trace() {
        let store = MemoryStore::new();

        let mut seed = WriteBatch::new();
        seed.put_field("project:1", "name", "\"Hydro\"");
        store.commit(seed).await.unwrap();

        let mut batch = WriteBatch::new();
        batch
            .put_field("project:1", "raisedAmount", "0")
            .increment("project:1", "name", 1);

        assert!(store.commit(batch).await.is_err());
        assert_eq!(store.field("project:1", "raisedAmount").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_type_is_rejected() {
        let store = MemoryStore::new();

        let mut batch = WriteBatch::new();
        batch.add_member("project:1:investors", "a");
        store.commit(batch).await.unwrap();

        assert!(store.fields("project:1:investors").await.is_err());
        assert_eq!(
            store.members("project:1:investors").await.unwrap(),
            vec!["a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_lists_keep_insertion_order() {
        let store = MemoryStore::new();

        let mut batch = WriteBatch::new();
        batch.append("founder:f:projects", "b").append("founder:f:projects", "a");
        store.commit(batch).await.unwrap();

        assert_eq!(store.items("founder:f:projects").await.unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_claim_keeps_first_writer() {
        let store = MemoryStore::new();

        assert!(store.claim("founder:names", "Mira", "f1").await.unwrap());
        assert!(!store.claim("founder:names", "Mira", "f2").await.unwrap());
        assert_eq!(
            store.field("founder:names", "Mira").await.unwrap(),
            Some("f1".to_string())
        );
    }
}
