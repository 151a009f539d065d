//! # siren-adapters
//!
//! Outbound HTTP adapters: the routing provider stack, the cloud triage
//! provider, and the geocoder. Every adapter absorbs its own failures —
//! callers see the next provider's answer or a deterministic fallback,
//! never an error.

pub mod geocode;
pub mod llm;
pub mod routing;
pub mod transport;

pub use geocode::NominatimGeocoder;
pub use llm::OllamaTriageProvider;
pub use routing::RoutingStack;
pub use transport::TransportFeedClient;
