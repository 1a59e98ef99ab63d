//! # DocShelf Convert
//!
//! Format detection and conversion for the ingestion pipeline:
//!
//! - [`detect`] maps file names to MIME types and media categories
//! - [`office`] unpacks OOXML/ODF containers into backend-ingestible
//!   text (the built-in [`ConverterSet`] implementation)
//! - [`thumb`] renders shelf preview thumbnails for image artifacts
//! - [`web`] handles URL artifacts: direct-file download or page scrape
//!
//! [`ConverterSet`]: docshelf_core::ConverterSet

pub mod detect;
pub mod office;
pub mod thumb;
pub mod web;

pub use detect::{category_for_mime, detect, Detected};
pub use office::OfficeConverter;
pub use thumb::image_thumbnail;
pub use web::{Fetched, UrlFetcher};
