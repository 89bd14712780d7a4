//! Identifier generation for threads and checkpoints.

use uuid::Uuid;

/// New random checkpoint id.
#[must_use]
pub fn new_checkpoint_id() -> String {
    Uuid::new_v4().to_string()
}

/// New thread id with a recognizable prefix.
#[must_use]
pub fn new_thread_id() -> String {
    format!("thread-{}", Uuid::new_v4())
}
