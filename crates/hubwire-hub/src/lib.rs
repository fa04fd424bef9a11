//! Server side of the hubwire hub protocol.
//!
//! A [`HubConnection`] turns a byte stream into typed messages and back. The
//! receive loop in [`serve_connection`] routes invocations to the
//! [`Dispatcher`], which binds arguments against a [`MethodRegistry`] and
//! runs each method as an isolated task, and routes stream items to the
//! [`StreamMultiplexer`].

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod server;
pub mod streams;

pub use config::{
    HubConfig, DEFAULT_CLIENT_TIMEOUT, DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_UPSTREAM_BUFFER,
};
pub use connection::{ConnectionState, HubConnection};
pub use dispatcher::Dispatcher;
pub use error::{HubError, InvocationError, Result};
pub use registry::{
    HubArgs, MethodDescriptor, MethodError, MethodRegistry, MethodResult, MethodReturn, ParamType,
};
pub use server::{serve_connection, Hub, CLIENT_TIMEOUT_REASON};
pub use streams::StreamMultiplexer;
