pub mod catalog;
pub mod chroma;
pub mod config;
pub mod disambiguate;
pub mod error;
pub mod executor;
pub mod intent;
pub mod join_graph;
pub mod llm;
pub mod normalize;
pub mod prompts;
pub mod repair;
pub mod resolver;
pub mod scoring;
pub mod synthesizer;
pub mod validator;
pub mod vector_store;
