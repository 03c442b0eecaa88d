//! Storage injected into the business services.
//!
//! - [`KeyValueStore`]: the trait services depend on
//! - [`MemoryStore`]: `DashMap`-backed implementation

pub mod engine;
pub mod engines;

pub use engine::KeyValueStore;
pub use engines::MemoryStore;
