//! Filament routing
//!
//! Where the filament is, which slot is loaded, and the sequences that move
//! filament between the changer and the nozzle.

pub mod park;
pub mod position;
pub mod router;

pub use park::{ParkContext, ParkProgress};
pub use position::{path_diagram, FilamentPosition, RoutingState};
pub use router::{FilamentRouter, RouterContext, RouterState};
