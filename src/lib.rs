//! # Gazette Watch
//!
//! Daily official-gazette retrieval and watch-term matching.
//!
//! Each run logs in to the gazette portal, downloads the most recent
//! published day's section archives (looking back a few days when today is
//! empty), extracts one document per legal act, and reports which
//! documents mention any of a set of watch terms, with short context
//! snippets. Subscribers and their terms live in a tiered store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌─────────┐
//! │ session  │──▶│ download │──▶│ extract │──▶│ matcher │──▶ [Match]
//! │ (portal) │   │ fallback │   │ zip+xml │   │ snippets│
//! └──────────┘   └──────────┘   └─────────┘   └─────────┘
//!        ▲                                         │
//!        └──────────────── pipeline ───────────────┘
//!
//! ┌──────────────────── store ────────────────────┐
//! │ redis ─▶ edge config ─▶ memory (always mirror) │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`error`] | Error types |
//! | [`models`] | Core data types |
//! | [`session`] | Authenticated portal client |
//! | [`download`] | Multi-day fallback download |
//! | [`extract`] | ZIP/XML extraction into documents |
//! | [`matcher`] | Term matching and snippets |
//! | [`pipeline`] | Download → extract → match in one call |
//! | [`store`] | Tiered subscriber state |
//! | [`summarize`] | Optional match summaries |
//! | [`notify`] | Per-subscriber notification sweep |

pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod summarize;
