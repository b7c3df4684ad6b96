pub mod backend;
pub mod session;
pub mod store;
pub mod wikibase;

pub use backend::GroundingBackend;
pub use session::GroundedSet;
pub use store::{clamp_k, GroundingError, GroundingStore, DEFAULT_K, MAX_K};
pub use wikibase::WikibaseBackend;
