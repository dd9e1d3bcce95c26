use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, MutexGuard};

static EVENT_IDS: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

fn lock_bucket() -> MutexGuard<'static, Option<SnowflakeIdBucket>> {
    EVENT_IDS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Seeds the alert event id generator.
///
/// `machine_id` and `node_id` must each be in `0..=31`. Devices sharing one
/// event sink should use distinct pairs so their ids never collide.
pub fn init(machine_id: i32, node_id: i32) {
    *lock_bucket() = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Returns a fresh, time-ordered event id.
pub fn next_id() -> String {
    let mut bucket = lock_bucket();
    bucket
        .get_or_insert_with(|| SnowflakeIdBucket::new(1, 1))
        .get_id()
        .to_string()
}
