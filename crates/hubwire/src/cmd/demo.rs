//! Methods served by `hubwire serve`.

use std::time::Duration;

use hubwire_hub::{MethodRegistry, MethodReturn, ParamType};
use hubwire_protocol::ValueKind;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

const STREAM_BUFFER: usize = 8;

pub fn registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();

    registry
        .register("echo", vec![ParamType::Value(ValueKind::Any)], |args| {
            Ok(MethodReturn::Value(args.value(0).cloned().unwrap_or(Value::Null)))
        })
        .register(
            "add",
            vec![
                ParamType::Value(ValueKind::I64),
                ParamType::Value(ValueKind::I64),
            ],
            |args| {
                let a: i64 = args.get(0)?;
                let b: i64 = args.get(1)?;
                let sum = a
                    .checked_add(b)
                    .ok_or_else(|| format!("{a} + {b} overflows"))?;
                MethodReturn::value(&sum)
            },
        )
        .register("sum", vec![ParamType::Upstream(ValueKind::I64)], |mut args| {
            let mut items = args.upstream(0)?;
            let (tx, rx) = oneshot::channel();
            tokio::spawn(async move {
                let mut total: i64 = 0;
                while let Some(item) = items.recv().await {
                    total = total.saturating_add(item.as_i64().unwrap_or_default());
                }
                let _ = tx.send(json!(total));
            });
            Ok(MethodReturn::Pending(rx))
        })
        .register(
            "countdown",
            vec![ParamType::Value(ValueKind::U32)],
            |args| {
                let from: u32 = args.get(0)?;
                let (tx, rx) = mpsc::channel(STREAM_BUFFER);
                tokio::spawn(async move {
                    for n in (0..=from).rev() {
                        if tx.send(json!(n)).await.is_err() {
                            break;
                        }
                    }
                });
                Ok(MethodReturn::Stream(rx))
            },
        )
        .register("delay", vec![ParamType::Value(ValueKind::U64)], |args| {
            let millis: u64 = args.get(0)?;
            let (tx, rx) = oneshot::channel();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                let _ = tx.send(json!(millis));
            });
            Ok(MethodReturn::Pending(rx))
        })
        .register("fail", vec![], |_| panic!("requested failure"));

    registry
}
