//! Webhook Simulator
//!
//! Fakes a third-party HTTP integration without writing code: inbound
//! requests are matched against declaratively configured flows, a JSON
//! response is synthesized from a template, and an optional webhook fires
//! on its own delay, independent of the response.
//!
//! # Features
//!
//! - **Flow Matching**: exact method/path, subset body patterns, exact headers
//! - **Templated Responses**: `${{ ... }}` placeholders drawing from the
//!   request body and headers or generating fresh data
//! - **Array Mapping**: `$each` descriptors expand a request array into a
//!   transformed output array
//! - **Independent Delays**: response and webhook each wait out their own
//!   timer and race the shutdown signal
//! - **Hot Reload**: the flow set is swapped atomically when definition
//!   files change on disk
//!
//! # Example Flow
//!
//! ```json
//! {
//!     "request": {
//!         "method": "POST",
//!         "path": "/payment",
//!         "body": { "user": { "username": "test_username" } }
//!     },
//!     "response": {
//!         "code": 200,
//!         "includeRequest": true,
//!         "body": { "id": "${{uuid}}", "created": "${{now}}" }
//!     },
//!     "web_hook": {
//!         "method": "POST",
//!         "path": "http://localhost:9999/callback",
//!         "delay": 2000,
//!         "body": { "status": "confirmed", "reference": "${{body.user.username}}" }
//!     }
//! }
//! ```

pub mod client;
pub mod compose;
pub mod config;
pub mod matcher;
pub mod server;
pub mod store;
pub mod template;
pub mod watcher;

pub use config::Flow;
pub use server::AppState;
pub use store::FlowStore;
