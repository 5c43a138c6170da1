use ahash::RandomState;
use chrono::Utc;
use std::any::Any;
use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};

pub type HashMap<K, V> = StdHashMap<K, V, RandomState>;
pub type HashSet<K> = StdHashSet<K, RandomState>;

/// Wall-clock milliseconds since the Unix epoch, the unit every envelope
/// timestamp uses.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Best effort extraction of the message carried by a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
