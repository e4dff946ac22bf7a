//! # rmm-core
//!
//! Narrow trait abstractions for the two external collaborators the
//! reflective memory management core calls synchronously: an embedding
//! model and a chat/summarisation language model.
//!
//! This crate intentionally does **not** provide streaming events, tool
//! calling, image/audio generation, or moderation — those belong to the
//! agent framework driving the conversation, which is an out-of-scope
//! collaborator as far as memory management is concerned. Keeping this
//! surface narrow means any embedding or chat provider can be wired in
//! with a couple of trait impls.
//!
//! ## Modules
//!
//! - [`embedding`] — turn text into dense vectors.
//! - [`llm`] — a single-shot prompt/response interface plus a small
//!   [`Message`](llm::Message) vocabulary.

#![no_std]
extern crate alloc;

pub mod embedding;
pub mod error;
pub mod llm;

#[doc(inline)]
pub use embedding::EmbeddingModel;
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use llm::LanguageModel;
