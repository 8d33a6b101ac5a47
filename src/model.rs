//! Response models the client core interprets: error bodies and pages.

pub mod error;
pub mod page;

pub use self::page::{Page, PageIter};
