//! ConverterSet trait — the abstraction over format converters.
//!
//! When an original format is not natively accepted by the backend, the
//! ingestion pipeline asks the converter set for backend-ingestible
//! bytes. The byte-level codecs themselves are implementation details
//! behind this seam.

use async_trait::async_trait;

use crate::artifact::Thumbnail;
use crate::error::ConvertError;

/// The output of a successful conversion.
#[derive(Debug, Clone)]
pub struct Converted {
    pub bytes: Vec<u8>,
    /// MIME type of the converted bytes, e.g. `text/csv`.
    pub ingest_format: String,
}

/// Produces backend-ingestible bytes from an original artifact.
#[async_trait]
pub trait ConverterSet: Send + Sync {
    /// Whether this format must be converted before upload.
    fn needs_conversion(&self, original_format: &str) -> bool;

    /// Convert original bytes to an ingestible form.
    async fn convert(
        &self,
        bytes: &[u8],
        original_format: &str,
    ) -> std::result::Result<Converted, ConvertError>;

    /// Optional preview image for the shelf. Default: none.
    fn thumbnail(&self, _bytes: &[u8], _original_format: &str) -> Option<Thumbnail> {
        None
    }
}
