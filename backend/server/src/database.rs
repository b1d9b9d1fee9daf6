//! # Redis
//!
//! RAM database holding every document.
//!
//! Core purpose is to store and look up founders, investors, projects, meetings and users. Also used
//! for atomic increments on raised amounts, investor balances and feedback counters.
//!
//! ## Implementation
//!
//! - One hash per document: `project:{id}`, `investor:{id}`, ...
//! - One name index hash per named collection: `project:names` maps name to id
//! - Project investors: set at `project:{id}:investors`
//! - Investor investments: hash at `investor:{id}:investments`, project id to amount
//! - Phase feedback: hash at `project:{id}:feedback`, `{phase}:likes` / `{phase}:dislikes`
//! - Founder projects and meetings: lists at `founder:{id}:projects` / `founder:{id}:meetings`
//! - User carbon footprint and bill analyses: `user:{id}:carbon` hash, `user:{id}:analyses` list
//! - Batches are `MULTI/EXEC` pipelines, Redis runs them without interleaving other clients
use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{
    AsyncCommands, Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::info;

use crate::store::{Op, Store, WriteBatch};

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url).context("Invalid Redis URL")?;
    let connection_manager = client
        .get_connection_manager_with_config(config)
        .await
        .context("Failed to connect to Redis")?;

    info!("Connected to Redis at {redis_url}");

    Ok(connection_manager)
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        Ok(Self::new(init_redis(redis_url).await?))
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn fields(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut connection = self.connection.clone();
        Ok(connection.hgetall(key).await?)
    }

    async fn field(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        Ok(connection.hget(key, field).await?)
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        let mut connection = self.connection.clone();
        let mut members: Vec<String> = connection.smembers(key).await?;
        members.sort();

        Ok(members)
    }

    async fn items(&self, key: &str) -> Result<Vec<String>> {
        let mut connection = self.connection.clone();
        Ok(connection.lrange(key, 0, -1).await?)
    }

    async fn increment(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut connection = self.connection.clone();
        Ok(connection.hincr(key, field, delta).await?)
    }

    async fn increment_float(&self, key: &str, field: &str, delta: f64) -> Result<f64> {
        let mut connection = self.connection.clone();
        Ok(redis::cmd("HINCRBYFLOAT")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut connection)
            .await?)
    }

    async fn claim(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        Ok(connection.hset_nx(key, field, value).await?)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();

        for op in batch.into_ops() {
            match op {
                Op::PutFields { key, fields } => {
                    pipe.hset_multiple(key, fields.as_slice()).ignore();
                }
                Op::RemoveFields { key, fields } => {
                    pipe.hdel(key, fields).ignore();
                }
                Op::Increment { key, field, delta } => {
                    pipe.hincr(key, field, delta).ignore();
                }
                Op::IncrementFloat { key, field, delta } => {
                    pipe.cmd("HINCRBYFLOAT").arg(key).arg(field).arg(delta).ignore();
                }
                Op::AddMember { key, member } => {
                    pipe.sadd(key, member).ignore();
                }
                Op::Append { key, value } => {
                    pipe.rpush(key, value).ignore();
                }
                Op::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }

        let mut connection = self.connection.clone();
        pipe.query_async::<()>(&mut connection)
            .await
            .context("Batch commit failed")?;

        Ok(())
    }
}
