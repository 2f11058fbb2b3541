pub mod providers;
pub mod responder;
pub mod retry;
pub mod streaming;

use qaforge_core::config::ModelConfig;
use qaforge_core::traits::LlmClient;

pub use providers::gemini::GeminiClient;
pub use providers::openai::OpenAiClient;
pub use responder::LlmResponder;
pub use retry::RetryPolicy;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    match config.provider.as_str() {
        "gemini" | "google" => Box::new(GeminiClient::new()),
        // Everything else uses the OpenAI-compatible client
        _ => Box::new(OpenAiClient::new()),
    }
}
