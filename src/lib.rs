//! # query-engine
//!
//! The assistant service behind the MoDX platform's chat box. A query is
//! answered by one of three strategies: a live catalog lookup, retrieval
//! over the knowledge index, or open web research. A generative model
//! picks the strategy and writes the final answer.
//!
//! ## Architecture
//!
//! ```text
//!                        ┌──────────────┐
//!                        │  POST /chat  │
//!                        └──────┬───────┘
//!                               ▼
//!                     ┌───────────────────┐
//!                     │   Orchestrator    │──────────────┐
//!                     └─────────┬─────────┘              │ no capability
//!                               │ capability call        ▼
//!                               ▼               ┌─────────────────┐
//!                     ┌───────────────────┐     │ Knowledge index │
//!                     │ CapabilityRegistry│     │  (RAG context)  │
//!                     └─────────┬─────────┘     └─────────────────┘
//!          ┌────────────┬───────┴──────┬──────────────┐
//!          ▼            ▼              ▼              ▼
//!   find_projects   find_users   find_projects   scrape_for_info
//!   (catalog)       (catalog)    _by_concept     (research pipeline:
//!                                (knowledge)      discover ─► fetch ×N
//!                                                 ─► summarize ×N
//!                                                 ─► consolidate)
//!
//!   Every model call goes through a FallbackManager that walks an
//!   ordered backend list (Gemini models) until one answers.
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for server, models, index, and research limits
//! - [`models`] - HTTP request/response types
//! - [`llm`] - Backend-neutral turns, the Gemini REST backend, and the fallback manager
//! - [`capability`] - Schema-checked capability registry and its handlers
//! - [`catalog`] - Read-only project/user snapshot behind the structured lookups
//! - [`knowledge`] - Client for the external vector-search service
//! - [`research`] - Bounded fan-out web research pipeline
//! - [`orchestrator`] - Per-query routing between capabilities and retrieval
//! - [`api`] - Axum handlers for chat, recommendations, and health
//! - [`state`] - Shared application state and service wiring

pub mod api;
pub mod capability;
pub mod catalog;
pub mod config;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod research;
pub mod state;
