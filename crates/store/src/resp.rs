//! Blocking client for a Redis-compatible server.
//!
//! Built on the `redis` crate's synchronous [`Connection`]. The connection is
//! opened on first use and dropped whenever a call fails at the connection
//! level; the next call opens a fresh one. Calls on one `RespStore` are
//! serialized by a mutex, which is what a single connection requires anyway.
//!
//! # Command mapping
//!
//! ```text
//!   set / set_nx        SET key value [EX ttl] [NX]
//!   expire(k, 0)        PERSIST k
//!   hscan               HGETALL + client-side range filter
//!   zscan               ZRANGEBYSCORE ... WITHSCORES LIMIT 0 n
//!   qpop_*(n)           LPOP/RPOP key n          (server 6.2+)
//! ```
//!
//! Scores travel as doubles; integer scores above 2^53 lose precision.

use crate::backend::{StoreBackend, Ttl};
use crate::error::{Result, StoreError};
use parking_lot::Mutex;
use redis::{Client, Cmd, Commands, Connection, ConnectionInfo, FromRedisValue, IntoConnectionInfo};
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings for one server.
#[derive(Debug, Clone)]
pub struct RespConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Applied to connect, read and write. Zero disables the deadline.
    pub timeout: Duration,
}

impl RespConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            timeout: Duration::from_millis(3000),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connection_info(&self) -> Result<ConnectionInfo> {
        let mut info = (self.host.as_str(), self.port).into_connection_info()?;
        info.redis.password = self.password.clone();
        Ok(info)
    }

    fn deadline(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}

fn open(config: &RespConfig) -> Result<Connection> {
    let client = Client::open(config.connection_info()?)?;
    let conn = match config.deadline() {
        Some(timeout) => client.get_connection_with_timeout(timeout)?,
        None => client.get_connection()?,
    };
    conn.set_read_timeout(config.deadline())?;
    conn.set_write_timeout(config.deadline())?;
    debug!(addr = %config.address(), "connected");
    Ok(conn)
}

fn score(value: f64) -> i64 {
    value as i64
}

fn scored(items: Vec<(String, f64)>) -> Vec<(String, i64)> {
    items.into_iter().map(|(m, s)| (m, score(s))).collect()
}

/// [`StoreBackend`] over a Redis-compatible server.
pub struct RespStore {
    config: RespConfig,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for RespStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespStore")
            .field("address", &self.config.address())
            .field("connected", &self.conn.lock().is_some())
            .finish()
    }
}

impl RespStore {
    /// Create a client. No connection is made until the first call.
    pub fn new(config: RespConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RespConfig {
        &self.config
    }

    fn run<T>(&self, f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(open(&self.config)?);
        }
        let result = match guard.as_mut() {
            Some(conn) => f(conn).map_err(StoreError::from),
            None => return Err(StoreError::Protocol("no connection".into())),
        };
        if let Err(err) = &result {
            if err.is_transient() {
                warn!(addr = %self.config.address(), error = %err, "dropping connection");
                *guard = None;
            }
        }
        result
    }

    fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        self.run(|conn| cmd.query(conn))
    }

    fn scored_range(&self, cmd: &Cmd) -> Result<Vec<(String, i64)>> {
        Ok(scored(self.query(cmd)?))
    }

    fn stop_index(offset: usize, limit: usize) -> usize {
        offset.saturating_add(limit - 1)
    }
}

impl StoreBackend for RespStore {
    fn ping(&self) -> Result<()> {
        self.query::<String>(&redis::cmd("PING")).map(|_| ())
    }

    fn reconnect(&self) -> Result<()> {
        *self.conn.lock() = None;
        self.ping()
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.run(|conn| conn.get(key))
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if ttl > 0 {
            cmd.arg("EX").arg(ttl);
        }
        self.query(&cmd)
    }

    fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if ttl > 0 {
            cmd.arg("EX").arg(ttl);
        }
        cmd.arg("NX");
        // OK when set, nil when the key already exists.
        let reply: Option<String> = self.query(&cmd)?;
        Ok(reply.is_some())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.run(|conn| conn.del::<_, i64>(key))? > 0)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.run(|conn| conn.exists(key))
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        if ttl == 0 {
            // PERSIST answers 0 for keys that exist but had no TTL.
            self.run(|conn| conn.persist::<_, i64>(key))?;
            self.exists(key)
        } else {
            Ok(self.query::<i64>(redis::cmd("EXPIRE").arg(key).arg(ttl))? > 0)
        }
    }

    fn ttl(&self, key: &str) -> Result<Ttl> {
        Ok(match self.run(|conn| conn.ttl::<_, i64>(key))? {
            -2 => Ttl::Missing,
            -1 => Ttl::Persistent,
            n => Ttl::Expires(n.max(0) as u64),
        })
    }

    fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        self.query(redis::cmd("INCRBY").arg(key).arg(delta))
    }

    fn hset(&self, name: &str, field: &str, value: &str) -> Result<()> {
        self.run(|conn| conn.hset::<_, _, _, i64>(name, field, value))
            .map(|_| ())
    }

    fn hget(&self, name: &str, field: &str) -> Result<Option<String>> {
        self.run(|conn| conn.hget(name, field))
    }

    fn hdel(&self, name: &str, field: &str) -> Result<bool> {
        Ok(self.run(|conn| conn.hdel::<_, _, i64>(name, field))? > 0)
    }

    fn hincr(&self, name: &str, field: &str, delta: i64) -> Result<i64> {
        self.query(redis::cmd("HINCRBY").arg(name).arg(field).arg(delta))
    }

    fn hexists(&self, name: &str, field: &str) -> Result<bool> {
        self.run(|conn| conn.hexists(name, field))
    }

    fn hsize(&self, name: &str) -> Result<u64> {
        self.run(|conn| conn.hlen(name))
    }

    fn hgetall(&self, name: &str) -> Result<Vec<(String, String)>> {
        let mut fields: Vec<(String, String)> = self.run(|conn| conn.hgetall(name))?;
        fields.sort();
        Ok(fields)
    }

    fn hscan(
        &self,
        name: &str,
        field_start: &str,
        field_end: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>> {
        Ok(self
            .hgetall(name)?
            .into_iter()
            .filter(|(f, _)| field_start.is_empty() || f.as_str() > field_start)
            .filter(|(f, _)| field_end.is_empty() || f.as_str() <= field_end)
            .take(limit)
            .collect())
    }

    fn hclear(&self, name: &str) -> Result<u64> {
        let size = self.hsize(name)?;
        self.run(|conn| conn.del::<_, i64>(name))?;
        Ok(size)
    }

    fn zset(&self, name: &str, member: &str, score: i64) -> Result<()> {
        self.run(|conn| conn.zadd::<_, _, _, i64>(name, member, score))
            .map(|_| ())
    }

    fn zget(&self, name: &str, member: &str) -> Result<Option<i64>> {
        let value: Option<f64> = self.run(|conn| conn.zscore(name, member))?;
        Ok(value.map(score))
    }

    fn zdel(&self, name: &str, member: &str) -> Result<bool> {
        Ok(self.run(|conn| conn.zrem::<_, _, i64>(name, member))? > 0)
    }

    fn zincr(&self, name: &str, member: &str, delta: i64) -> Result<i64> {
        let value: f64 = self.query(redis::cmd("ZINCRBY").arg(name).arg(delta).arg(member))?;
        Ok(score(value))
    }

    fn zsize(&self, name: &str) -> Result<u64> {
        self.run(|conn| conn.zcard(name))
    }

    fn zrange(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<(String, i64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = Self::stop_index(offset, limit);
        self.scored_range(redis::cmd("ZRANGE").arg(name).arg(offset).arg(stop).arg("WITHSCORES"))
    }

    fn zrrange(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<(String, i64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = Self::stop_index(offset, limit);
        self.scored_range(
            redis::cmd("ZREVRANGE")
                .arg(name)
                .arg(offset)
                .arg(stop)
                .arg("WITHSCORES"),
        )
    }

    fn zscan(
        &self,
        name: &str,
        member_start: &str,
        score_start: Option<i64>,
        score_end: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(String, i64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let upper = score_end.map_or_else(|| "+inf".to_string(), |s| s.to_string());

        match score_start {
            Some(start) if !member_start.is_empty() => {
                if score_end.map_or(false, |end| end < start) {
                    return Ok(Vec::new());
                }
                // Same score, after the resume member.
                let mut out: Vec<(String, i64)> = self
                    .scored_range(
                        redis::cmd("ZRANGEBYSCORE")
                            .arg(name)
                            .arg(start)
                            .arg(start)
                            .arg("WITHSCORES"),
                    )?
                    .into_iter()
                    .filter(|(m, _)| m.as_str() > member_start)
                    .take(limit)
                    .collect();

                if out.len() < limit {
                    out.extend(
                        self.scored_range(
                            redis::cmd("ZRANGEBYSCORE")
                                .arg(name)
                                .arg(format!("({}", start))
                                .arg(&upper)
                                .arg("WITHSCORES")
                                .arg("LIMIT")
                                .arg(0)
                                .arg(limit - out.len()),
                        )?,
                    );
                }
                Ok(out)
            }
            _ => {
                let lower = score_start.map_or_else(|| "-inf".to_string(), |s| s.to_string());
                self.scored_range(
                    redis::cmd("ZRANGEBYSCORE")
                        .arg(name)
                        .arg(lower)
                        .arg(upper)
                        .arg("WITHSCORES")
                        .arg("LIMIT")
                        .arg(0)
                        .arg(limit),
                )
            }
        }
    }

    fn qpush_front(&self, name: &str, item: &str) -> Result<u64> {
        self.run(|conn| conn.lpush(name, item))
    }

    fn qpush_back(&self, name: &str, item: &str) -> Result<u64> {
        self.run(|conn| conn.rpush(name, item))
    }

    fn qpop_front(&self, name: &str, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.query(redis::cmd("LPOP").arg(name).arg(count))
    }

    fn qpop_back(&self, name: &str, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.query(redis::cmd("RPOP").arg(name).arg(count))
    }

    fn qsize(&self, name: &str) -> Result<u64> {
        self.run(|conn| conn.llen(name))
    }
}
