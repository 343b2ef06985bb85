pub mod assistant;
pub mod conversation;
pub mod gemini;
pub mod llm;
pub mod stt;
pub mod tts;
