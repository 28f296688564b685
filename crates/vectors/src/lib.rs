pub mod edge_store;
pub mod embeddings;
pub mod summary_index;

pub use edge_store::{DEFAULT_BATCH_SIZE, EdgeEmbeddingJob, EdgeHit, EdgeVectorStore};
pub use embeddings::EmbeddingClient;
pub use summary_index::{SummaryHit, SummaryIndex};
