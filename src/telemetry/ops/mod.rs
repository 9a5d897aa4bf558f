pub mod run;
pub mod profiles;
pub mod inspect;
