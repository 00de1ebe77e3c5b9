pub mod credit;
pub mod payment;
pub mod plan;
pub mod transaction;
