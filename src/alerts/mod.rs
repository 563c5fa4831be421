//! Alert rule evaluation: condition grammar, message templating, and
//! notification dispatch.

pub mod channel;
pub mod condition;
pub mod template;
