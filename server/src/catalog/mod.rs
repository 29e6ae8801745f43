//! The sharded ticket catalog: routing, row normalization, lookup, listing
//! queries, in-memory filtering and seller-side listing management.

pub mod filter;
pub mod listing;
pub mod normalize;
pub mod query;
pub mod resolver;
pub mod shard;

pub use filter::{filter_and_sort, search, FilterParams, Listing, Searchable};
pub use listing::{ListingEdit, ListingError, ListingService, NewListing};
pub use query::{CatalogPage, CatalogService};
pub use resolver::{ShardScanResolver, TicketResolver};
pub use shard::{ShardId, ShardMap};
