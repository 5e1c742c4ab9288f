// News Harvester Library
//
// Harvests article listings from a configurable set of news sites, one set of
// selectors per site, and serves the merged result behind a rate-limited API.

pub mod api;
pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod harvest;
pub mod normalize;
pub mod rate_limit;
pub mod sites;
pub mod utils;

// Re-export main types for convenience
pub use config::AppConfig;
pub use extractor::{ExtractError, Record, extract_records};
pub use fetcher::{FetchError, FetchResult, FetchSettings, HttpFetcher, PageFetcher};
pub use harvest::{HarvestError, HarvestOutcome, HarvestSettings, Harvester, SiteReport, SiteState};
pub use rate_limit::{RateDecision, RateGovernor, RateLimitSettings};
pub use sites::{SiteDescriptor, SiteRegistry};
pub use utils::{Jitter, USER_AGENTS, get_random_user_agent};
