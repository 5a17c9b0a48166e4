//! Message and batch identifiers
//!
//! Both are random (v4) UUIDs: 122 bits of entropy, no coordination between
//! calls, threads or processes.

use uuid::Uuid;

pub struct MessageIdentity;

impl MessageIdentity {
    pub fn new_message_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn new_batch_id() -> String {
        Uuid::new_v4().to_string()
    }
}
