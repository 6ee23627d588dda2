//! Migrates Felix Online articles from the legacy CMS database into a Ghost
//! import file.
//!
//! Each article's stored blocks are decoded ([`decode`]), rendered to HTML
//! ([`blocks`]), cleaned up ([`normalize`]) and filtered down to what Ghost
//! accepts ([`sanitize`]). [`assemble`] wraps the body with the article's
//! metadata and [`export`] writes the import document.

pub mod assemble;
pub mod blocks;
pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod export;
pub mod normalize;
pub mod sanitize;
pub mod source;
