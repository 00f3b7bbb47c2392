//! storage-redirect - per-application filesystem policy engine
//!
//! This library exposes the policy store, the decision engine, audit logging and the
//! audit collector daemon. A hooking layer plugs in through [`interceptor::Interceptor`].

pub mod audit;
pub mod config;
pub mod constants;
pub mod daemon;
pub mod interceptor;
pub mod logging;
pub mod models;
pub mod output;
pub mod policy;
