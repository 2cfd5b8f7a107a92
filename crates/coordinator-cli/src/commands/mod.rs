//! CLI subcommands: `register`, `peek`, `send`, `wait`, `ack`.

pub mod ack;
pub mod peek;
pub mod register;
pub mod send;
pub mod wait;
