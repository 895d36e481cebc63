pub mod executor;
pub mod genai_executor;
pub mod host;
pub mod prompts;
pub mod tools;
