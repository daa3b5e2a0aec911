pub mod input;
pub mod registry;
pub mod run;
