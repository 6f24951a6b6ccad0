//! Broker services: crypto primitives, caches, the event bus, the three-leg
//! broker and identity resolution.

pub mod broker;
pub mod cache;
pub mod cipher;
pub mod claims;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod events;
pub mod flow_store;
pub mod identity;
pub mod jobs;
pub mod metrics;
pub mod provider;
pub mod registry;

pub use broker::{BrokerSettings, IssuedToken, OAuthBroker};
pub use cache::{InMemoryCache, RedisCache, TtlCache};
pub use cipher::{CipherError, SecretCipher};
pub use claims::{Claims, ClaimsTokenService, TokenError};
pub use credentials::ClientCredentials;
pub use directory::ProviderDirectory;
pub use error::{BrokerError, ResolveError};
pub use events::{AuthEnforcement, DomainEvent, EventBus, EventKind, Subscriber};
pub use identity::{IdentityResolver, ResolvedIdentity};
pub use jobs::BackgroundJobs;
pub use provider::{IdentityProviderAdapter, OAuth2Adapter, ProviderError};
pub use registry::{InMemoryRegistry, ProviderRegistry};
