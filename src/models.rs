pub mod audit;
pub mod health;
pub mod role;
pub mod session;
pub mod token;
pub mod user;
