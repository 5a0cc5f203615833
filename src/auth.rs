//! Auth-domain identifiers, resource scopes, user assertions, and delegated tokens.

pub mod assertion;
pub mod id;
pub mod scope;
pub mod token;

pub use assertion::*;
pub use id::*;
pub use scope::*;
pub use token::{delegated::*, secret::*};
