pub mod address;
pub mod identity;
pub mod run;
pub mod sources;
