//! kbrecall - knowledge-base retrieval for LLM context
//!
//! Recalls question/answer chunks from a dense vector store and a lexical
//! index for several query variants, fuses the ranked lists with reciprocal
//! rank fusion, optionally reranks them with a cross-encoder, removes
//! duplicate content and trims the result to a token budget.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod retrieval;
pub mod storage;

pub use error::{KbError, Result};
