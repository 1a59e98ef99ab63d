//! # DocShelf Core
//!
//! Domain types, traits, and error definitions for the DocShelf engine.
//! This crate has **zero framework dependencies** — it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here: the remote
//! multimodal backend, the converter set, tools. Implementations live in
//! their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod artifact;
pub mod backend;
pub mod convert;
pub mod error;
pub mod message;
pub mod tool;
pub mod validate;

// Re-export key types at crate root for ergonomics
pub use artifact::{Artifact, ArtifactId, ArtifactSource, ArtifactStatus, FileSet, MediaCategory, RemoteFile, Thumbnail};
pub use backend::{Backend, CacheHandle, CountRequest, ReasoningDepth, ToolDefinition, TurnRequest, TurnResponse, Usage};
pub use convert::{Converted, ConverterSet};
pub use message::{Message, MessageToolCall, Role, SessionId, Transcript};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
