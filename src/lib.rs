// Tether - managed HTTP cycles for Rust
//
// This library runs HTTP exchanges as cycles that retry transient failures,
// transform payloads through processor chains, and answer authentication
// challenges through pluggable handlers.

// Re-export the HTTP layer
pub use tether_http::*;

// Prelude for common imports
pub mod prelude {
    pub use tether_http::prelude::*;
}
