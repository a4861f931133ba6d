pub mod balance;
pub mod bus;
pub mod chain;
pub mod compliance;
pub mod events;
pub mod ingress;
pub mod lifecycle;
pub mod matching;
pub mod nonce;
pub mod permissions;
pub mod stats;
pub mod swap;
