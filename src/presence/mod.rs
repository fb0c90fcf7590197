pub mod presence_directory;
pub mod redis_presence;

pub use presence_directory::{InMemoryPresence, PresenceDirectory};
pub use redis_presence::RedisPresence;
