//! Ethereum JSON-RPC transport and contract ABI
//!
//! `RpcClient` is a thin reqwest-based JSON-RPC 2.0 client. The contract
//! surfaces it talks to are declared in `abi` with the `sol!` macro.

pub mod abi;
mod client;

pub use client::{RpcClient, RpcError, TransactionReceipt, TransactionRequest};
