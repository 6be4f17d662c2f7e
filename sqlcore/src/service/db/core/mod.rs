//! Core database service modules
//!
//! 설정, 연결/준비 게이트, 실행 trait과 백엔드(MySQL, 인메모리), 트랜잭션, 공통 타입

pub mod config;
pub mod connection;
pub mod executor;
pub mod filter;
pub mod memory;
pub mod mysql;
pub mod transaction;
pub mod types;

pub use config::{DbServiceConfig, PoolConfig, QueryConfig};
pub use connection::{ConnectionManager, Connector, DatabaseEvent, GateState, ReadyGate};
pub use executor::{Backend, QueryExecutor, ReadHandle, SelectQuery, TransactionExecutor, WriteHandle};
pub use filter::Filter;
pub use memory::{MemoryBackend, MemoryConnector};
pub use mysql::{MySqlConnector, MySqlExecutor};
pub use transaction::{run_in_transaction, Transaction, TransactionManager};
pub use types::*;
