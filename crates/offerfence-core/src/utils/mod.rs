pub mod decode;
pub mod geo;

pub use geo::distance_meters;
