#[macro_use]
extern crate serde;

#[macro_use]
extern crate lazy_static;

mod ballot;
mod cipher;
mod command;
mod config;
mod deactivation;
mod elgamal;
mod error;
mod field;
mod hashing;
mod keys;
mod pack;
mod poll;
mod signature;
mod state;
mod state_leaf;
mod store;
mod subsidy;
mod tree;

pub mod serde_field;

pub use ballot::*;
pub use cipher::*;
pub use command::*;
pub use config::*;
pub use deactivation::*;
pub use elgamal::*;
pub use error::*;
pub use field::*;
pub use hashing::*;
pub use keys::*;
pub use pack::*;
pub use poll::*;
pub use signature::*;
pub use state::*;
pub use state_leaf::*;
pub use store::*;
pub use subsidy::*;
pub use tree::*;
