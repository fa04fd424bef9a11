//! Minimal hub with a single `echo` method, serving one connection.
//!
//! Run with:
//!   cargo run --example echo-hub
//!
//! In another terminal:
//!   cargo run --features cli -- invoke 127.0.0.1:5080 echo --args '["hello"]'

use hubwire::hub::{Hub, HubConfig, MethodRegistry, MethodReturn, ParamType};
use hubwire::protocol::ValueKind;
use hubwire::transport::HubListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = MethodRegistry::new();
    registry.register("echo", vec![ParamType::Value(ValueKind::Any)], |args| {
        let value = args.value(0).cloned().unwrap_or_default();
        Ok(MethodReturn::Value(value))
    });

    let hub = Hub::new(registry, HubConfig::default())?;
    let listener = HubListener::bind("127.0.0.1:5080").await?;
    eprintln!("Listening on {}", listener.local_addr()?);

    let stream = listener.accept().await?;
    eprintln!("Client connected: {}", stream.connection_id());
    hub.serve(stream).await?;
    eprintln!("Client disconnected");
    Ok(())
}
