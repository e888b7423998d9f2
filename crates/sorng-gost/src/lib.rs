//! # sorng-gost
//!
//! Runs the GOST forwarding engine as a managed subprocess and wires it into
//! the host's virtual network tunnel so device traffic flows through a single
//! upstream SOCKS5 proxy hop.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **types** | Shared data model, supervisor state machine, errors, paths |
//! | **validate** | Pure validation of proxy configuration and rules |
//! | **config** | Native engine config generation, JSON/YAML export and import |
//! | **store** | Single-owner configuration store with persistence |
//! | **process** | Engine binary install, spawn, stop, crash detection |
//! | **logging** | Subprocess output capture, bounded store, durable log file |
//! | **network** | Tunnel network settings and the host apply capability |
//! | **orchestrator** | Host lifecycle handling (start / stop / message) |
//! | **provider** | Callback-style adapter for the host tunnel runtime |

pub mod gost;
