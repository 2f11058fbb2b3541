pub mod gemini;
pub mod openai;
pub mod presets;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use qaforge_core::error::QaforgeError;

/// Map a non-success HTTP response to the error taxonomy.
///
/// Rate limits must stay distinguishable: the retry policy only acts on
/// `RateLimited`.
pub(crate) fn classify_http_error(status: reqwest::StatusCode, body: &str) -> QaforgeError {
    let lower = body.to_lowercase();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || lower.contains("resource_exhausted")
        || lower.contains("resourceexhausted")
        || lower.contains("quota")
    {
        QaforgeError::RateLimited(format!("HTTP {}: {}", status, body))
    } else if status == reqwest::StatusCode::NOT_FOUND {
        QaforgeError::ModelNotFound(format!("HTTP {}: {}", status, body))
    } else {
        QaforgeError::LlmRequest(format!("HTTP {}: {}", status, body))
    }
}
