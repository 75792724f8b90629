//! sea-orm entities for the rotation coordinator tables.

pub mod assignments;
pub mod outbox_archive;
pub mod outbox_messages;
pub mod swap_records;
