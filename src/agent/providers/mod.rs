//! Concrete agent transport implementations.

pub mod openai;

pub use openai::OpenAiTransport;
