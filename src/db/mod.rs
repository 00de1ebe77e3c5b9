pub mod credit_account_repository;
pub mod mock_db;
pub mod payment_repository;
pub mod postgres_credit_account_repository;
pub mod postgres_payment_repository;
