pub mod auth;
pub mod barcode;
pub mod courier;
pub mod credit;
pub mod health;
pub mod letters;
