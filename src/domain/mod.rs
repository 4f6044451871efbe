pub mod apartment;
pub mod error;
pub mod filter;

pub use apartment::{AdType, Apartment, BuildingStatus, City, Coordinates, User};
pub use error::FilterError;
pub use filter::{distance, Filter, DISTANCE_TOLERANCE_M};
