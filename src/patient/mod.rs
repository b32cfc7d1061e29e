//! Patient records and the store that places them on shards.

mod model;
mod page;
mod sql;
mod store;

pub use model::{Address, ContactEntry, Patient, PatientDetails, DATE_FORMAT};
pub use page::Page;
pub use store::PatientStore;
