pub mod commit;
pub mod core;
pub mod profiles;
pub mod rows;
pub mod selection;
pub mod staging;
pub mod view;
