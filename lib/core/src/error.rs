//! Error handling foundation for the travel concierge.
//!
//! Only the `Result` alias lives here. Each crate owns its error enums and
//! converts them into a `Report` at its public boundary.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
