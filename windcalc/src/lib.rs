pub mod claim;
pub mod geometry;
pub mod wind;

pub use claim::extract_claim;
pub use geometry::{WindGeometry, angle_between, crosswind_component, headwind_component, magnetic_correction};
pub use wind::{WindParseError, WindString};
