//! # Gatewarden
//!
//! **Defensive reverse proxy for an application origin.**
//!
//! Gatewarden sits in front of an HTTP origin and filters inbound traffic:
//! known-bad client IPs are rejected from a reputation cache before any rule
//! work happens, requests to declared endpoints are checked against
//! whitelist/blacklist rule sets over their headers, cookies, body fields and
//! URL path segments, and surviving traffic is forwarded to the origin
//! unchanged. Blocked clients are penalized in the reputation cache.
//!
//! ## Architecture
//!
//! - **[`proxy`]** — the listener, the per-request pipeline and the origin
//!   forwarder, plus the [`proxy::Runtime`] record shared by all handlers
//! - **[`policy`]** — endpoint/rule data model, the rule matcher, the `$$`
//!   path matcher, the body extractor, the evaluator and the project-file
//!   provider with hot reload
//! - **[`reputation`]** — IP → score store over a pluggable key-value
//!   backend (Redis in production, in-memory in tests)
//! - **[`audit`]** — Postgres audit store attachment and schema check
//! - **[`web`]** — local-only JSON control plane under `/api/…`
//! - **[`cli`]** — command-line interface (clap)
//! - **[`error`]** — unified error types using `thiserror`
//!
//! ## Quick Start
//!
//! ```bash
//! export CURRENT_PROJECT=shop
//! export PROXY_PORT=3000
//! export SERVER_PORT=4000
//! gatewarden start
//! ```

pub mod audit;
pub mod cli;
pub mod error;
pub mod policy;
pub mod proxy;
pub mod reputation;
pub mod web;
