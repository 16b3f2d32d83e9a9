pub mod alert;
pub mod reading;
pub mod station;

pub use alert::{AlertTask, TYPE_WATER_ALERT};
pub use reading::{Classification, NewReading, Reading, ReadingStatus};
pub use station::Station;
