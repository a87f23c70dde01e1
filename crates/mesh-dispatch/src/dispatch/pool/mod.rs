pub mod manager;
pub mod request;
pub mod worker;
