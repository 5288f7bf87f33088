pub mod chat;
pub mod responses;
