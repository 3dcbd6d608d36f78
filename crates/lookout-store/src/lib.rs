//! Lookout job record store.
//!
//! Scan jobs and their result entries are persisted as one JSON document per
//! job. Every mutation is a read-modify-write of a single record performed
//! under the store lock and made durable by writing a temporary file and
//! renaming it over the old one, so a reader never observes a half-written
//! record and result entries appear together with the Completed transition.

pub mod store;

pub use store::{FileJobStore, JobStore, StoreError};
