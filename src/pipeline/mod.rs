//! Pipeline stages for rule extraction.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the network-facing step can be swapped for a scripted double.
//!
//! ## Data Flow
//!
//! ```text
//! input ─▶ render ─▶ chunk ─▶ orchestrate ─▶ validate ─▶ aggregate ─▶ assemble
//! (path/URL) (pdfium)  (windows) (extract ×N)  (per window) (by trade)   (JSON → sink)
//! ```
//!
//! 1. [`input`]  — canonicalise the user-supplied path or URL to a local PDF
//! 2. [`render`] — rasterise every page on a blocking thread; [`encode`]
//!    turns each image into a base64 PNG
//! 3. [`chunk`]  — plan overlapping page windows
//! 4. [`orchestrate`] — bounded-concurrency fan-out over an
//!    [`extract::ExtractionClient`], with retry and abort policy
//! 5. [`validate`] — locate JSON in each raw answer and check every rule
//! 6. [`aggregate`] — group by trade and merge overlap duplicates
//! 7. [`assemble`] — render the output document and hand it to a sink

pub mod aggregate;
pub mod assemble;
pub mod chunk;
pub mod encode;
pub mod extract;
pub mod input;
pub mod orchestrate;
pub mod render;
pub mod validate;
