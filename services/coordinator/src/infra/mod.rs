pub mod cache;
pub mod db;
pub mod memory;
pub mod publisher;
pub mod tx;
