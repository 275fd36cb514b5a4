pub mod extraction;
pub mod fetch;
