//! Adaptive frame-capture and batched-analysis pipeline.
//!
//! A [`session::SessionController`] pulls frames from a [`traits::FrameSource`]
//! on an adaptive cadence, keeps only frames whose content changed
//! ([`differ::FrameDiffer`]), batches them through a vision model
//! ([`analyzer::BatchAnalyzer`]) and folds the per-frame analyses into one
//! session summary ([`summarizer::SummarizerAdapter`]). Concrete frame sources
//! and model clients are supplied by the caller through the boundary traits.

pub mod analyzer;
pub mod buffer;
pub mod clock;
pub mod differ;
pub mod events;
pub mod session;
pub mod summarizer;
pub mod traits;
