//! Address to region resolution.
//!
//! Resolvers are passed explicitly into every stage that tags records, so
//! there is no process-wide region map. They must be `Sync` because ingestion
//! workers share one resolver.

use std::collections::HashMap;

use crate::analysis::types::UNKNOWN_REGION;
use crate::utils::host_of;

use super::region_table::RegionTable;

/// Maps an address (with or without port) to a region label
pub trait RegionResolver: Sync {
    /// Region for `address`, or `None` when it is not known
    fn lookup(&self, address: &str) -> Option<String>;

    /// Region for `address`, falling back to [`UNKNOWN_REGION`]
    fn resolve(&self, address: &str) -> String {
        self.lookup(address)
            .unwrap_or_else(|| UNKNOWN_REGION.to_string())
    }
}

impl RegionResolver for RegionTable {
    fn lookup(&self, address: &str) -> Option<String> {
        self.region_for(host_of(address)).map(String::from)
    }
}

impl RegionResolver for HashMap<String, String> {
    fn lookup(&self, address: &str) -> Option<String> {
        self.get(host_of(address)).cloned()
    }
}

/// Resolver that knows no regions; every address is unknown
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegions;

impl RegionResolver for NoRegions {
    fn lookup(&self, _address: &str) -> Option<String> {
        None
    }
}

/// Adapts a closure into a resolver
pub struct FnResolver<F>(pub F);

impl<F> RegionResolver for FnResolver<F>
where
    F: Fn(&str) -> Option<String> + Sync,
{
    fn lookup(&self, address: &str) -> Option<String> {
        (self.0)(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_resolver_strips_port() {
        let mut map = HashMap::new();
        map.insert("10.0.0.1".to_string(), "nyc3".to_string());

        assert_eq!(map.resolve("10.0.0.1:26656"), "nyc3");
        assert_eq!(map.resolve("10.0.0.1"), "nyc3");
        assert_eq!(map.resolve("10.0.0.2"), UNKNOWN_REGION);
    }

    #[test]
    fn test_fn_resolver() {
        let resolver = FnResolver(|address: &str| {
            address.starts_with('A').then(|| "R1".to_string())
        });
        assert_eq!(resolver.resolve("A"), "R1");
        assert_eq!(resolver.resolve("B"), UNKNOWN_REGION);
        assert_eq!(NoRegions.resolve("A"), UNKNOWN_REGION);
    }
}
