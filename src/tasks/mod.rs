pub mod acquisition;
pub mod presentation;
