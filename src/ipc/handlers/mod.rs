pub mod admin;
pub mod auth;
pub mod core;
pub mod reports;
pub mod status;
pub mod tickets;
pub mod tutors;
pub mod working;
