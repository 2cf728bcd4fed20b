//! Region resolution for node and peer addresses.
//!
//! This module parses the fixed-column droplet listing that maps public
//! addresses to regions, and exposes the resolver abstraction that the
//! ingestion and latency stages thread through their work.

pub mod region_table;
pub mod resolver;

// Re-export commonly used types
pub use region_table::{load_region_table, parse_region_table, LineRejection, RegionTable, RegionTableRow};
pub use resolver::{FnResolver, NoRegions, RegionResolver};
