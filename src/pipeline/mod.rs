pub mod driver;
pub mod add;
pub mod delete;
pub mod modify;
pub mod moddn;
pub mod compare;
pub mod bind;
pub mod search;
