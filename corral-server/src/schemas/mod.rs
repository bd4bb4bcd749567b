//! Request / response schema types, versioned like the HTTP surface.

pub mod v1;
