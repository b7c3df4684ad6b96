pub mod cache;
pub mod classify;
pub mod engine;
pub mod lint;
pub mod rate;
pub mod results;
pub mod scan;
pub mod strategy;
pub mod testing;
pub mod transport;

pub use cache::{normalize_query, normalize_text, CachedRun, ResultCache, TtlCache};
pub use classify::{ErrorNormalizer, FailureSignal, TransportKind};
pub use engine::{EngineSettings, ExecutionEngine, PingReport};
pub use lint::{LintConfig, LintError, LintRule, LintVerdict, LintViolation, Linter};
pub use rate::{RateGovernor, RatePolicy, RateState};
pub use strategy::{RequestStrategy, FALLBACK_ORDER};
pub use transport::{HttpTransport, OutboundRequest, RawResponse, SparqlTransport, TransportError};
