//! Request validation
//!
//! DTOs derive [`validator::Validate`]; handlers take them through the
//! [`ValidatedJson`] extractor so invalid payloads never reach a service.

pub mod extractor;
pub mod validators;

pub use extractor::ValidatedJson;
