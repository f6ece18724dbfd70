pub mod clock;
pub mod error;
pub mod feature;
pub mod gate;
pub mod geo;
pub mod ids;
pub mod track;

pub use error::CoreError;
pub use feature::{Feature, FeatureClass, Geometry, Position, Properties};
pub use gate::{PauseGuard, SyncGate};
pub use geo::Bounds;
pub use ids::FeatureId;
pub use track::TrackName;
