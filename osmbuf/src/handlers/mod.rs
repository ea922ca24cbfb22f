//! Handlers shipped with the library.

mod bbox;
mod locations;
mod member_ways;
mod progress;
mod serialize;
mod stats;

pub use bbox::FindBbox;
pub use locations::NodeLocations;
pub use member_ways::{MemberWays, MultipolygonStatus};
pub use progress::Progress;
pub use serialize::SerializationHandler;
pub use stats::Statistics;
