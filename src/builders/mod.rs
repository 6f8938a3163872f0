//! Builders to construct the resolution core from configuration.

pub mod resolver_builder;

pub use resolver_builder::{build_resolvers, ResolverDeps, ResolverSet, ResolverSetStats};
