pub mod catalog;
pub mod config;
pub mod db_internal;
pub mod permissions;
pub mod pg_executor;
pub mod utils;
