//! Audience resolution. Turns a campaign's static customer ids and dynamic
//! filter rules into the set of customers enrolled at start.

pub mod directory;
pub mod filter;
pub mod resolver;

pub use directory::{CustomerDirectory, InMemoryDirectory};
pub use filter::AudienceFilter;
pub use resolver::AudienceResolver;
