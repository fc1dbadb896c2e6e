pub mod locator;
pub mod monitor;
pub mod web;
