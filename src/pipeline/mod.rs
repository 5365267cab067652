//! Pipeline stages for author extraction.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable and lets the rendering and inference
//! backends be swapped without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ classify ──▶ extract ──▶ aggregate
//! (paths)   (pdfium)   (signals)    (VLM)       (merge)
//!              │                       │
//!            encode          inference + parse + postprocess
//! ```
//!
//! 1. [`input`]    : list PDFs, check magic bytes, derive document ids
//! 2. [`render`]   : rasterise selected pages and collect page text; runs
//!    in `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]   : JPEG/PNG-encode each `DynamicImage`
//! 4. [`classify`] : document type, institution and termination signals;
//!    non-person heuristics; plain-text byline fallback
//! 5. [`extract`]  : drive the model call with retry/backoff across the
//!    endpoint pool and validate what comes back
//! 6. [`inference`]: the HTTP protocol spoken to an inference endpoint
//! 7. [`parse`]    : lenient JSON extraction from model text
//! 8. [`postprocess`]: deterministic name, title and e-mail cleanup
//! 9. [`aggregate`]: merge per-page candidates into final records

pub mod aggregate;
pub mod classify;
pub mod encode;
pub mod extract;
pub mod inference;
pub mod input;
pub mod parse;
pub mod postprocess;
pub mod render;
