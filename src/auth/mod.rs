pub mod access;
pub mod account;
pub mod password;
pub mod router;
pub mod tokens;
pub mod user;
