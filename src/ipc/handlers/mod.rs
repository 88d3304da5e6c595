pub mod classes;
pub mod core;
pub mod search;
pub mod setup;
pub mod students;
pub mod violation_categories;
pub mod violation_types;
pub mod violations;
