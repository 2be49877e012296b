pub mod category;
pub mod ledger;
pub mod restore;
pub mod run;
pub mod settings;
