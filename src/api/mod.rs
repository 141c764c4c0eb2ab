pub mod generate;
pub mod health;
pub mod request;
pub mod stream;
