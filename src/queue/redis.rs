//! Redis-backed queue backend.
//!
//! Key layout for a queue named `N`: `N:queued` and `N:processing` are
//! lists of job ids, `N:notify` is a pub/sub channel carrying freshly
//! pushed ids for wake-up purposes only (never a source of truth).
//!
//! Pushes run a small server-side script so the capacity check and the
//! LPUSH are one atomic step; claims BRPOPLPUSH from the right end, so
//! the server performs the queued-to-processing move atomically and the
//! queue is FIFO. Requeueing RPOPLPUSHes `processing` back onto the tail
//! of `queued` one id at a time, oldest claim first.
//!
//! Every storage failure degrades to the safe default with a logged
//! warning; the dispatcher keeps running through a Redis outage.

use std::time::Duration;

use redis::{Commands, RedisResult};
use tracing::warn;

use crate::error::{Error, Result};

use super::QueueBackend;

/// Bounded insert in one server round-trip. Checking the two lengths
/// client-side and pushing afterwards would let concurrent producers
/// overshoot the bound.
const PUSH_SCRIPT: &str = r#"
if redis.call('LLEN', KEYS[1]) + redis.call('LLEN', KEYS[2]) >= tonumber(ARGV[2]) then
    return 0
end
redis.call('LPUSH', KEYS[1], ARGV[1])
return 1
"#;

/// Durable queue over a Redis instance.
#[derive(Debug)]
pub struct RedisQueue {
    client: redis::Client,
    queued_key: String,
    processing_key: String,
    notify_key: String,
    max_size: usize,
}

impl RedisQueue {
    /// Create a queue named `name` bounded at `max_size`, connecting to
    /// `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub fn new(url: &str, name: &str, max_size: usize) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| Error::queue("connect", e.to_string()))?;
        Ok(Self {
            client,
            queued_key: format!("{}:queued", name),
            processing_key: format!("{}:processing", name),
            notify_key: format!("{}:notify", name),
            max_size,
        })
    }

    fn connection(&self, operation: &str) -> Option<redis::Connection> {
        match self.client.get_connection() {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(operation, error = %e, "queue storage unavailable");
                None
            }
        }
    }
}

impl QueueBackend for RedisQueue {
    fn push(&self, id: &str) -> bool {
        let Some(mut conn) = self.connection("push") else {
            return false;
        };

        let pushed: RedisResult<i64> = redis::Script::new(PUSH_SCRIPT)
            .key(&self.queued_key)
            .key(&self.processing_key)
            .arg(id)
            .arg(self.max_size)
            .invoke(&mut conn);

        match pushed {
            Ok(1) => {
                // Wake-up only; a lost notification costs one pend timeout.
                let notified: RedisResult<()> = conn.publish(&self.notify_key, id);
                if let Err(e) = notified {
                    warn!(operation = "push", error = %e, "notify publish failed");
                }
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(operation = "push", error = %e, "queue storage unavailable");
                false
            }
        }
    }

    fn pend(&self, timeout: Duration) -> Option<String> {
        let mut conn = self.connection("pend")?;

        let result: RedisResult<Option<String>> = conn.brpoplpush(
            &self.queued_key,
            &self.processing_key,
            timeout.as_secs_f64(),
        );
        match result {
            Ok(id) => id,
            Err(e) => {
                warn!(operation = "pend", error = %e, "queue storage unavailable");
                None
            }
        }
    }

    fn pop(&self, id: &str) -> bool {
        let Some(mut conn) = self.connection("pop") else {
            return false;
        };

        let removed: RedisResult<usize> = conn.lrem(&self.processing_key, 1, id);
        match removed {
            Ok(count) => count > 0,
            Err(e) => {
                warn!(operation = "pop", error = %e, "queue storage unavailable");
                false
            }
        }
    }

    fn size(&self) -> usize {
        self.queued_size() + self.processing_size()
    }

    fn queued_size(&self) -> usize {
        self.list_len("queued_size", &self.queued_key)
    }

    fn processing_size(&self) -> usize {
        self.list_len("processing_size", &self.processing_key)
    }

    fn requeue_processing(&self) -> usize {
        let Some(mut conn) = self.connection("requeue_processing") else {
            return 0;
        };

        let mut moved = 0;
        loop {
            // RPOPLPUSH takes the oldest claim and lands it at the tail
            // of queued, so claim order survives the recovery.
            let result: RedisResult<Option<String>> =
                conn.rpoplpush(&self.processing_key, &self.queued_key);
            match result {
                Ok(Some(_)) => moved += 1,
                Ok(None) => return moved,
                Err(e) => {
                    warn!(
                        operation = "requeue_processing",
                        error = %e,
                        moved,
                        "queue storage unavailable"
                    );
                    return moved;
                }
            }
        }
    }

    fn clear(&self) {
        let Some(mut conn) = self.connection("clear") else {
            return;
        };
        let result: RedisResult<()> = conn.del(vec![
            self.queued_key.as_str(),
            self.processing_key.as_str(),
            self.notify_key.as_str(),
        ]);
        if let Err(e) = result {
            warn!(operation = "clear", error = %e, "queue storage unavailable");
        }
    }

    fn peek_queued(&self) -> Option<String> {
        self.peek("peek_queued", &self.queued_key)
    }

    fn peek_processing(&self) -> Option<String> {
        self.peek("peek_processing", &self.processing_key)
    }
}

impl RedisQueue {
    fn list_len(&self, operation: &str, key: &str) -> usize {
        let Some(mut conn) = self.connection(operation) else {
            return 0;
        };
        let len: RedisResult<usize> = conn.llen(key);
        match len {
            Ok(len) => len,
            Err(e) => {
                warn!(operation, error = %e, "queue storage unavailable");
                0
            }
        }
    }

    /// The list right end is the next-out side for both lists.
    fn peek(&self, operation: &str, key: &str) -> Option<String> {
        let mut conn = self.connection(operation)?;
        let id: RedisResult<Option<String>> = conn.lindex(key, -1);
        match id {
            Ok(id) => id,
            Err(e) => {
                warn!(operation, error = %e, "queue storage unavailable");
                None
            }
        }
    }
}
