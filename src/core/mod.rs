pub mod client;
pub mod form;
pub mod redirect;
pub mod requester;
pub mod session;
pub mod types;
