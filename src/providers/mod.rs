//! Search provider implementations.

// Document retrieval
mod exa;

// Web index
mod serper;

// Generative answers
mod perplexity;

pub use exa::Exa;
pub use perplexity::Perplexity;
pub use serper::Serper;
