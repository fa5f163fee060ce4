//! Small helpers behind the community dashboards: score ranking and
//! distance filtering for nearby requests.

pub mod geo;
pub mod leaderboard;

pub use geo::{haversine_km, within_radius, Coordinate, GeoError, Located, EARTH_RADIUS_KM};
pub use leaderboard::{rank, CitizenScore, LeaderboardEntry, RewardTier};
