//! Group-purchase domain module.
//!
//! A group order collects members until its deadline; once the deadline passes it
//! either completes (enough members joined) or expires.

pub mod order;

pub use order::{GroupOrder, GroupOrderStatus};
