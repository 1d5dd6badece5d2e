//! Pipeline stages for note-to-HTML snapshotting.
//!
//! Each submodule implements one transformation step and can be tested on
//! its own against a parsed fragment.
//!
//! ## Data Flow
//!
//! ```text
//! markdown ──▶ preprocess ──▶ renderer ──▶ settle ──▶ embed ──▶ transform
//! (note)       (dataview)     (host)      (quiet)    (![[…]])  (links, chrome)
//!                                                                 │
//!                     math ◀── raster ◀── inline ◀────────────────┘
//!                   (formulas)  (svg→png)  (data URIs)
//! ```
//!
//! 1. [`preprocess`] — line-based markdown cleanup before rendering
//! 2. [`settle`]     — wait until the renderer's async post-processing stops
//! 3. [`embed`]      — expand embedded notes and images one level deep
//! 4. [`transform`]  — front matter, links, footnotes, code and callout
//!    tables, with [`foreign`] removing host and plugin chrome
//! 5. [`inline`]     — turn every image source into a data URI, using
//!    [`fetch`] for bytes and [`encode`] for MIME and base64
//! 6. [`raster`]     — rasterize SVG (images and inline elements) to PNG
//! 7. [`math`]       — pair formula placeholders with their sources before the
//!    transform, then replace the surviving ones with typeset SVG

pub mod embed;
pub mod encode;
pub mod fetch;
pub mod foreign;
pub mod inline;
pub mod math;
pub mod preprocess;
pub mod raster;
pub mod settle;
pub mod transform;
