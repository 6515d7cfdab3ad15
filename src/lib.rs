pub mod config;
pub mod domain;
pub mod engine;
pub mod infrastructure;
pub mod stats;

/// Returns the numblr-core user agent string with the current version.
///
/// Format: "numblr-core/X.Y.Z"
pub fn user_agent() -> String {
    format!("numblr-core/{}", env!("CARGO_PKG_VERSION"))
}
