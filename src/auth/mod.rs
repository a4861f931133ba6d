pub mod admin;
pub mod eip712;
pub mod rate_limit;
