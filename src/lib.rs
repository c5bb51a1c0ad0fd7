//! Provisions Proxmox LXC containers for approved requests.
//!
//! A run logs in to the hypervisor, loads approved requests from PostgreSQL,
//! creates one container per request and records the resulting instance.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod proxmox;
pub mod store;
