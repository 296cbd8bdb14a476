pub mod backoffice;
pub mod ledger;
pub mod monthend;
pub mod records;
