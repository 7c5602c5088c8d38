pub mod attendance;
pub mod backup;
pub mod core;
pub mod missed;
pub mod roster;
pub mod signals;
pub mod sync;
pub mod timetable;
