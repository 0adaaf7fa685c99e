//! Domain models for the dispatch marketplace

pub mod account;
pub mod order;
pub mod status;

pub use account::{Account, Transaction};
pub use order::{Evidence, MainOrder, OrderVariant, Refund, SubOrder};
pub use status::{
    MainOrderStatus, Role, SubOrderStatus, TransactionKind, TransactionStatus, UnknownName,
};
