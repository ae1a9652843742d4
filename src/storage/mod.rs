// src/storage/mod.rs

pub mod file;
pub mod key_state;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod traits;

pub use file::{FileConversationStore, FileKeyStateStore};
pub use key_state::{ApiKeyRecord, ApiState, KeyStatus};
pub use memory::{InMemoryConversationStore, InMemoryKeyStateStore};
#[cfg(feature = "redis")]
pub use self::redis::RedisResponseCache;
pub use traits::{ConversationStore, KeyStateStore, ResponseCache};
