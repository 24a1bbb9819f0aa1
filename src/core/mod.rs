pub mod analyzer;
pub mod cache;
pub mod classifier;
pub mod executor;
pub mod generator;
pub mod greeting;
pub mod llm;
pub mod prompts;
pub mod repair;
