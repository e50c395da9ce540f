//! LedD: LED stripe daemon for PCA9685 PWM controllers on I2C.

pub mod bus;
pub mod color;
pub mod config;
pub mod control;
pub mod controller;
pub mod daemon;
pub mod dispatch;
pub mod effect;
pub mod error;
pub mod registers;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod store;
pub mod stripe;

pub use error::LeddError;
