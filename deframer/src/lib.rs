// Library interface for the deframer modules
// This allows tests and the binary to import modules

pub mod error;
pub mod retry;
pub mod llm;
pub mod source;
pub mod ingestion;
pub mod storage;
pub mod render;
pub mod reframer;
pub mod pipeline;
pub mod server;
pub mod worker;
