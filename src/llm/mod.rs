pub mod chat;
pub mod consensus;
pub mod embeddings;
pub mod prompt;
