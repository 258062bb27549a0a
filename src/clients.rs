pub mod gemini;
pub mod storage;

pub use gemini::{GeminiImageClient, GeneratedImage, ImageProvider, ProviderError};
pub use storage::SupabaseStorageClient;
