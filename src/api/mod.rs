pub mod relations;
pub mod tables;
