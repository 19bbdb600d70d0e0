pub mod embedding_enricher;
pub mod llm_provider;
pub mod openai_chat;
pub mod openai_embedding;
pub mod report;
pub mod topic_enricher;

pub use embedding_enricher::EmbeddingEnricher;
pub use llm_provider::*;
pub use openai_chat::OpenAiChatClient;
pub use openai_embedding::OpenAiEmbeddingClient;
pub use report::{BatchReport, SkippedEntry};
pub use topic_enricher::{ClusterMetadata, TopicEnricher};
