pub mod memory_store;
pub mod message_dto;
pub mod message_handlers;
pub mod message_models;
pub mod message_repository;
pub mod message_service;

pub use memory_store::InMemoryMessageStore;
pub use message_dto::SendMessageRequest;
pub use message_models::{Conversation, Message};
pub use message_repository::{MessageRepository, MessageStore};
pub use message_service::MessageService;
