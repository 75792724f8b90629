pub mod assignment;
pub mod swap;
