// ABOUTME: Configuration constants for Ecorun
// ABOUTME: Exposes environment variable names read by the sandbox runner and CLI

pub mod constants;

pub use constants::*;
