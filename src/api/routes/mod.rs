pub mod alerts;
pub mod health;
pub mod hosts;
pub mod keys;
pub mod webhook;
