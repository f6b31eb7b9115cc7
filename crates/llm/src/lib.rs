//! Generative service adapters for the [`pipeline::BacklogGenerator`] port.
//!
//! Two providers are supported: a local HTTP endpoint (typically a developer
//! function running next to the tool) and the OpenAI Responses API. A
//! [`FallbackGenerator`] tries them in order.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, prompt rendering and response parsing
//! live here. Output is returned as untrusted JSON; validation happens in
//! [`pipeline::validate`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`prompt`] | Prompt text for first attempts and re-prompts |
//! | [`extract`] | Reducing model text to a JSON document |
//! | [`local`] | `LocalEndpointGenerator` |
//! | [`openai`] | `OpenAiGenerator` |
//! | [`fallback`] | `FallbackGenerator` |

pub mod extract;
pub mod fallback;
mod http;
pub mod local;
pub mod openai;
pub mod prompt;

pub use extract::extract_json;
pub use fallback::FallbackGenerator;
pub use local::LocalEndpointGenerator;
pub use openai::{OpenAiConfig, OpenAiGenerator};
pub use prompt::render_prompt;
