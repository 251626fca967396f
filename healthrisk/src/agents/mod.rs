pub mod decision;
pub mod retriever;
pub mod summarizer;
