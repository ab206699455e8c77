//! Row models, database enums, and job payload shapes.

pub mod models;
pub mod payloads;
