pub mod dao;
pub mod models;

pub use dao::{GenerationStore, PgGenerationStore};
