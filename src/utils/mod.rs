pub mod duration;
pub use duration::parse_iso8601_duration;
