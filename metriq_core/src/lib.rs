/// Module for keyword-driven fallback queries.
pub mod basic;

/// Module providing the TTL result cache and the table-result registry.
pub mod cache;

/// Module for the canonical metric and table dictionary.
pub mod dictionary;

/// Module tying loading, caching and execution into one engine.
pub mod engine;

/// Module defining the typed failure taxonomy.
pub mod error;

/// Module deriving audit evidence from executed results.
pub mod evidence;

/// Module responsible for executing structured plans.
pub mod executor;

/// Module for the in-memory tabular frame.
pub mod frame;

/// Module for intent classification and its keyword fallback.
pub mod intent;

/// Module for dataset loading collaborators.
pub mod loader;

/// Module defining query plans and the filter tree.
pub mod plan;

/// Module mapping natural-language questions onto dictionary metrics.
pub mod resolver;

/// Module for cell values and explicit type coercion.
pub mod value;

/// Re-export of the dictionary used across resolution and execution.
pub use dictionary::Dictionary;

/// Re-export of the main engine responsible for running plans.
pub use engine::QueryEngine;

/// Re-export of the plan executor's result type.
pub use executor::QueryResult;

/// Re-export of the semantic resolver and its request types.
pub use resolver::{ConversationContext, ResolveRequest, SemanticResolver};

/// Re-export of the loader contract and the bundled implementations.
pub use loader::{CsvLoader, MemoryLoader, TableLoader};
