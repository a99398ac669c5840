pub mod address;
pub mod numeric;
pub mod revert;
pub mod similarity;
