//! Input validation for user-supplied fields.

pub mod profile;
