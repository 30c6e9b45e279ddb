pub mod adapter;
#[cfg(feature = "gemini")]
pub mod client;
pub mod prompts;
#[cfg(feature = "gemini")]
pub mod types;

pub use adapter::*;
#[cfg(feature = "gemini")]
pub use client::*;
