//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`): the HTTPS-only token
//! endpoint, the fixed database resource scope, the issuers and audiences accepted on
//! inbound assertions, and the client authentication preference.
//! `strategy` defines [`ProviderStrategy`], an HTTP-client-agnostic hook used by the
//! exchanger to augment outgoing token requests and map provider errors into the crate
//! taxonomy.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;
