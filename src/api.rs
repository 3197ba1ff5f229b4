pub(crate) mod device;
pub(crate) mod teacher;

mod helper;
