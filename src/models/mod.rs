pub mod analysis;
pub mod context;
pub mod display;
pub mod schema;
