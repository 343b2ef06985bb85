//! Dashboard endpoints under `/api`, all behind the bearer token.

pub mod auth;
pub mod chat;
pub mod gemini;
pub mod outbound;
pub mod outreach;
pub mod realtime;
pub mod tts;
