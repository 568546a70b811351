//! MongoDB schemas

pub mod application;

pub use application::APPLICATION_COLLECTION;
