pub mod activity;
pub mod enrollment;
pub mod guest;
pub mod guest_child;
pub mod invitation;
pub mod member;
pub mod message;
pub mod password_reset;
pub mod session;
pub mod task;
pub mod user;
pub mod volunteer;
