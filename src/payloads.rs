pub mod device;
pub mod teacher;
