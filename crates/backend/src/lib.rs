//! # DocShelf Backend
//!
//! Concrete implementations of the [`Backend`] trait. Currently the
//! Gemini generative-language REST API.
//!
//! [`Backend`]: docshelf_core::Backend

pub mod gemini;

pub use gemini::GeminiBackend;
