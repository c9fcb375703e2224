pub mod chat;
pub mod conversation;
pub mod retrieve;
pub mod upload;
