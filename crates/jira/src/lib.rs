//! Jira Cloud adapter for the [`pipeline::IssueTracker`] port.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, authentication, Atlassian Document
//! Format rendering and status classification live here. The orchestration
//! layer sees only [`pipeline::IssueTracker`] and [`pipeline::TrackerApiError`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | Connection settings (`JiraConfig`) |
//! | [`adf`] | Plain text to Atlassian Document Format |
//! | [`client`] | REST v3 client (`JiraTracker`) |

pub mod adf;
pub mod client;
pub mod config;

pub use adf::to_adf;
pub use client::{edit_fields_for, fields_for, JiraTracker};
pub use config::JiraConfig;
