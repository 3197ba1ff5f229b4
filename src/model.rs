pub mod device;
pub mod records;
pub mod teacher;
