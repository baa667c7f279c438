// Market data access layer
// Collaborator traits and the cost-aware cache that fronts every external lookup

pub mod cache;
pub mod provider;
pub mod sources;

pub use cache::{CacheStats, DataCache};
pub use provider::{CacheConfig, CachedMarketData};
pub use sources::{
    HeuristicScoringService, InMemoryStore, KeyValueStore, MarketDataSource, ScoringService,
    SyntheticMarketData,
};
