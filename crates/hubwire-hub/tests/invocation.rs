use std::time::Duration;

use futures_util::StreamExt;
use hubwire_frame::RecordCodec;
use hubwire_hub::{Hub, HubConfig, MethodRegistry, MethodReturn, ParamType};
use hubwire_protocol::ValueKind;
use hubwire_transport::ConnectionStream;
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_WINDOW: Duration = Duration::from_millis(200);

type Gate = oneshot::Sender<Value>;

struct TestClient {
    reader: FramedRead<ReadHalf<DuplexStream>, RecordCodec>,
    writer: WriteHalf<DuplexStream>,
    calls: mpsc::UnboundedReceiver<String>,
    gates: mpsc::UnboundedReceiver<Gate>,
    server: JoinHandle<hubwire_hub::Result<()>>,
}

impl TestClient {
    async fn send(&mut self, json: &str) {
        self.writer.write_all(json.as_bytes()).await.unwrap();
        self.writer.write_all(&[0x1e]).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.reader.next())
            .await
            .expect("timed out waiting for a message")
            .expect("server ended the stream")
            .unwrap();
        serde_json::from_slice(&frame.payload).unwrap()
    }

    async fn call(&mut self) -> String {
        tokio::time::timeout(RECV_TIMEOUT, self.calls.recv())
            .await
            .expect("timed out waiting for a call")
            .unwrap()
    }

    /// Sender that completes the most recent `gate` invocation.
    async fn gate(&mut self) -> Gate {
        tokio::time::timeout(RECV_TIMEOUT, self.gates.recv())
            .await
            .expect("timed out waiting for a gate")
            .unwrap()
    }

    async fn assert_silent(&mut self) {
        let next = tokio::time::timeout(QUIET_WINDOW, self.reader.next()).await;
        assert!(next.is_err(), "unexpected message: {next:?}");
    }
}

fn quiet_config() -> HubConfig {
    HubConfig::default()
        .with_keep_alive_interval(None)
        .with_client_timeout(None)
}

fn registry(calls: mpsc::UnboundedSender<String>, gates: mpsc::UnboundedSender<Gate>) -> MethodRegistry {
    let mut registry = MethodRegistry::new();

    let log = calls.clone();
    registry.register("Simple", vec![], move |_| {
        log.send("Simple()".into()).ok();
        Ok(MethodReturn::Unit)
    });

    let log = calls.clone();
    registry.register(
        "SimpleInt",
        vec![ParamType::Value(ValueKind::I64)],
        move |args| {
            let value: i64 = args.get(0)?;
            log.send(format!("SimpleInt({value})")).ok();
            MethodReturn::value(&(value + 1))
        },
    );

    let log = calls.clone();
    registry.register(
        "SimpleFloat",
        vec![ParamType::Value(ValueKind::F64)],
        move |args| {
            let value: f64 = args.get(0)?;
            log.send(format!("SimpleFloat({value})")).ok();
            Ok(MethodReturn::Values(vec![
                json!(value * 10.0),
                json!(value * 100.0),
            ]))
        },
    );

    let log = calls.clone();
    registry.register(
        "SimpleString",
        vec![
            ParamType::Value(ValueKind::String),
            ParamType::Value(ValueKind::String),
        ],
        move |args| {
            let first: String = args.get(0)?;
            let second: String = args.get(1)?;
            log.send(format!("SimpleString({first}, {second})")).ok();
            MethodReturn::value(&(first + &second).to_lowercase())
        },
    );

    let log = calls.clone();
    registry.register("Async", vec![], move |_| {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tx.send(json!(true)).ok();
        });
        log.send("Async()".into()).ok();
        Ok(MethodReturn::Pending(rx))
    });

    let log = calls.clone();
    registry.register("AsyncClosedChan", vec![], move |_| {
        let (tx, rx) = oneshot::channel::<Value>();
        drop(tx);
        log.send("AsyncClosedChan()".into()).ok();
        Ok(MethodReturn::Pending(rx))
    });

    let log = calls.clone();
    registry.register("Panic", vec![], move |_| {
        log.send("Panic()".into()).ok();
        panic!("Don't panic!");
    });

    registry.register("Fail", vec![], |_| Err("disk on fire".into()));

    registry.register(
        "Sum",
        vec![ParamType::Upstream(ValueKind::I64)],
        |mut args| {
            let mut items = args.upstream(0)?;
            let (tx, rx) = oneshot::channel();
            tokio::spawn(async move {
                let mut total = 0;
                while let Some(item) = items.recv().await {
                    total += item.as_i64().unwrap_or_default();
                }
                tx.send(json!(total)).ok();
            });
            Ok(MethodReturn::Pending(rx))
        },
    );

    registry.register(
        "Countdown",
        vec![ParamType::Value(ValueKind::U32)],
        |args| {
            let from: u32 = args.get(0)?;
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                for n in (1..=from).rev() {
                    if tx.send(json!(n)).await.is_err() {
                        break;
                    }
                }
            });
            Ok(MethodReturn::Stream(rx))
        },
    );

    registry.register("Gate", vec![], move |_| {
        let (tx, rx) = oneshot::channel();
        gates.send(tx).ok();
        Ok(MethodReturn::Pending(rx))
    });

    // Keeps its upstream open without ever reading from it.
    registry.register(
        "Hold",
        vec![ParamType::Upstream(ValueKind::I64)],
        |mut args| {
            let items = args.upstream(0)?;
            let (tx, rx) = oneshot::channel::<Value>();
            tokio::spawn(async move {
                let _held = (items, tx);
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
            Ok(MethodReturn::Pending(rx))
        },
    );

    let log = calls.clone();
    registry.register("Slow", vec![], move |_| {
        std::thread::sleep(Duration::from_millis(300));
        log.send("Slow()".into()).ok();
        Ok(MethodReturn::Unit)
    });

    registry
}

fn connect(config: HubConfig) -> TestClient {
    let (calls_tx, calls) = mpsc::unbounded_channel();
    let (gates_tx, gates) = mpsc::unbounded_channel();
    let hub = Hub::new(registry(calls_tx, gates_tx), config).unwrap();
    let (stream, client) = ConnectionStream::memory("conn-test", 64 * 1024);
    let server = tokio::spawn(async move { hub.serve(stream).await });

    let (read_half, writer) = tokio::io::split(client);
    TestClient {
        reader: FramedRead::new(read_half, RecordCodec::new()),
        writer,
        calls,
        gates,
        server,
    }
}

fn assert_error_completion(message: &Value, invocation_id: &str) {
    assert_eq!(message["type"], json!(3));
    assert_eq!(message["invocationId"], json!(invocation_id));
    assert!(message.get("result").is_none(), "unexpected result: {message}");
    let error = message["error"].as_str().expect("error text");
    assert!(!error.is_empty());
}

#[tokio::test]
async fn simple_invocation() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId": "123","target":"simple"}"#)
        .await;

    assert_eq!(client.call().await, "Simple()");
    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"123"}));
}

#[tokio::test]
async fn invalid_json_gets_no_answer() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId": "123","target":"simpleint", arguments[CanNotParse]}"#)
        .await;
    client
        .send(r#"{"type":1,"invocationId":"after","target":"simple"}"#)
        .await;

    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"after"}));
}

#[tokio::test]
async fn simple_int_invocation() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId": "666","target":"simpleint","arguments":[314]}"#)
        .await;

    assert_eq!(client.call().await, "SimpleInt(314)");
    assert_eq!(
        client.recv().await,
        json!({"type":3,"invocationId":"666","result":315})
    );
}

#[tokio::test]
async fn invalid_argument_is_not_invoked() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId": "555","target":"simpleint","arguments":["CantParse"]}"#)
        .await;

    assert_error_completion(&client.recv().await, "555");
    assert!(client.calls.try_recv().is_err());
}

#[tokio::test]
async fn wrong_argument_count_is_an_error() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId":"556","target":"simpleint","arguments":[1,2]}"#)
        .await;

    assert_error_completion(&client.recv().await, "556");
}

#[tokio::test]
async fn simple_float_returns_two_values() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId": "8087","target":"simplefloat","arguments":[2.5]}"#)
        .await;

    assert_eq!(client.call().await, "SimpleFloat(2.5)");
    assert_eq!(
        client.recv().await,
        json!({"type":3,"invocationId":"8087","result":[25.0,250.0]})
    );
}

#[tokio::test]
async fn simple_string_invocation() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId": "6502","target":"simplestring","arguments":["Camel", "Cased"]}"#)
        .await;

    assert_eq!(client.call().await, "SimpleString(Camel, Cased)");
    assert_eq!(
        client.recv().await,
        json!({"type":3,"invocationId":"6502","result":"camelcased"})
    );
}

#[tokio::test]
async fn async_invocation() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId": "mfg","target":"async"}"#)
        .await;

    assert_eq!(client.call().await, "Async()");
    assert_eq!(
        client.recv().await,
        json!({"type":3,"invocationId":"mfg","result":true})
    );
}

#[tokio::test]
async fn async_closed_channel_is_an_error() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId": "ouch","target":"asyncclosedchan"}"#)
        .await;

    assert_eq!(client.call().await, "AsyncClosedChan()");
    assert_error_completion(&client.recv().await, "ouch");
}

#[tokio::test]
async fn panic_is_redacted_by_default() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId": "???","target":"panic"}"#)
        .await;

    assert_eq!(client.call().await, "Panic()");
    let reply = client.recv().await;
    assert_error_completion(&reply, "???");
    assert!(!reply["error"].as_str().unwrap().contains("Don't panic!"));

    // The connection keeps serving after a panic.
    client
        .send(r#"{"type":1,"invocationId":"next","target":"simple"}"#)
        .await;
    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"next"}));
}

#[tokio::test]
async fn detailed_errors_expose_failure_text() {
    let mut client = connect(quiet_config().with_detailed_errors(true));
    client
        .send(r#"{"type":1,"invocationId":"p","target":"panic"}"#)
        .await;
    let reply = client.recv().await;
    assert!(reply["error"].as_str().unwrap().contains("Don't panic!"));

    client
        .send(r#"{"type":1,"invocationId":"f","target":"fail"}"#)
        .await;
    let reply = client.recv().await;
    assert_error_completion(&reply, "f");
    assert!(reply["error"].as_str().unwrap().contains("disk on fire"));
}

#[tokio::test]
async fn missing_method_is_an_error() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId": "0000","target":"missing"}"#)
        .await;

    let reply = client.recv().await;
    assert_error_completion(&reply, "0000");
    assert!(reply["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn fire_and_forget_sends_nothing() {
    let mut client = connect(quiet_config());
    client.send(r#"{"type":1,"target":"simple"}"#).await;
    client.send(r#"{"type":1,"target":"missing"}"#).await;
    client
        .send(r#"{"type":1,"invocationId":"after","target":"simple"}"#)
        .await;

    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"after"}));
    assert_eq!(client.call().await, "Simple()");
    assert_eq!(client.call().await, "Simple()");
}

#[tokio::test]
async fn typed_decode_failure_with_id_is_answered() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId":"bad","arguments":[]}"#)
        .await;

    assert_error_completion(&client.recv().await, "bad");
}

#[tokio::test]
async fn upstream_items_are_summed() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId":"s","target":"sum","arguments":[],"streamIds":["u1"]}"#)
        .await;
    client.send(r#"{"type":2,"invocationId":"u1","item":1}"#).await;
    client.send(r#"{"type":2,"invocationId":"u1","item":2.9}"#).await;
    client.send(r#"{"type":2,"invocationId":"u1","item":3}"#).await;
    client.send(r#"{"type":3,"invocationId":"u1"}"#).await;

    assert_eq!(
        client.recv().await,
        json!({"type":3,"invocationId":"s","result":6})
    );
}

#[tokio::test]
async fn upstream_kind_mismatch_keeps_stream_open() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId":"s","target":"sum","arguments":[],"streamIds":["u1"]}"#)
        .await;
    client.send(r#"{"type":2,"invocationId":"u1","item":"x"}"#).await;
    client.send(r#"{"type":2,"invocationId":"u1","item":5}"#).await;
    client.send(r#"{"type":3,"invocationId":"u1"}"#).await;

    assert_eq!(
        client.recv().await,
        json!({"type":3,"invocationId":"s","result":5})
    );
}

#[tokio::test]
async fn unknown_stream_item_is_ignored() {
    let mut client = connect(quiet_config());
    client.send(r#"{"type":2,"invocationId":"nope","item":1}"#).await;
    client.send(r#"{"type":3,"invocationId":"nope"}"#).await;
    client
        .send(r#"{"type":1,"invocationId":"after","target":"simple"}"#)
        .await;

    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"after"}));
}

#[tokio::test]
async fn more_stream_ids_than_parameters_is_an_error() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId":"s","target":"sum","arguments":[],"streamIds":["a","b"]}"#)
        .await;

    assert_error_completion(&client.recv().await, "s");
}

#[tokio::test]
async fn missing_stream_ids_is_an_error() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId":"s","target":"sum","arguments":[]}"#)
        .await;

    assert_error_completion(&client.recv().await, "s");
}

#[tokio::test]
async fn server_stream_sends_items_then_completion() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":4,"invocationId":"c","target":"countdown","arguments":[3]}"#)
        .await;

    for n in [3, 2, 1] {
        assert_eq!(
            client.recv().await,
            json!({"type":2,"invocationId":"c","item":n})
        );
    }
    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"c"}));
}

#[tokio::test]
async fn cancelled_invocation_never_completes() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId":"w","target":"gate"}"#)
        .await;
    let gate = client.gate().await;

    client.send(r#"{"type":5,"invocationId":"w"}"#).await;
    client
        .send(r#"{"type":1,"invocationId":"a1","target":"simple"}"#)
        .await;
    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"a1"}));

    // The result shows up only after the cancel has been handled.
    gate.send(json!("late")).ok();
    client.assert_silent().await;

    client
        .send(r#"{"type":1,"invocationId":"a2","target":"simple"}"#)
        .await;
    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"a2"}));
}

#[tokio::test]
async fn active_invocation_id_cannot_be_reused() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId":"dup","target":"gate"}"#)
        .await;
    let gate = client.gate().await;

    client
        .send(r#"{"type":1,"invocationId":"dup","target":"simple"}"#)
        .await;
    assert_error_completion(&client.recv().await, "dup");
    assert!(client.calls.try_recv().is_err(), "duplicate was invoked");

    // The first invocation keeps its id and still completes.
    gate.send(json!("open")).ok();
    assert_eq!(
        client.recv().await,
        json!({"type":3,"invocationId":"dup","result":"open"})
    );

    client
        .send(r#"{"type":1,"invocationId":"dup","target":"simple"}"#)
        .await;
    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"dup"}));
}

#[tokio::test]
async fn full_upstream_does_not_stall_other_invocations() {
    let mut client = connect(quiet_config().with_upstream_buffer(2));
    client
        .send(r#"{"type":1,"invocationId":"h","target":"hold","arguments":[],"streamIds":["u1"]}"#)
        .await;
    for n in 1..=5 {
        client
            .send(&format!(r#"{{"type":2,"invocationId":"u1","item":{n}}}"#))
            .await;
    }
    client
        .send(r#"{"type":1,"invocationId":"other","target":"simple"}"#)
        .await;

    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"other"}));
}

#[tokio::test]
async fn blocking_method_does_not_stall_the_connection() {
    let mut client = connect(quiet_config());
    client
        .send(r#"{"type":1,"invocationId":"s","target":"slow"}"#)
        .await;
    client
        .send(r#"{"type":1,"invocationId":"q","target":"simple"}"#)
        .await;

    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"q"}));
    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"s"}));
}

#[tokio::test]
async fn ping_and_unknown_types_are_ignored() {
    let mut client = connect(quiet_config());
    client.send(r#"{"type":6}"#).await;
    client.send(r#"{"type":42,"future":true}"#).await;
    client
        .send(r#"{"type":1,"invocationId":"after","target":"simple"}"#)
        .await;

    assert_eq!(client.recv().await, json!({"type":3,"invocationId":"after"}));
}

#[tokio::test]
async fn client_close_ends_the_loop() {
    let mut client = connect(quiet_config());
    client.send(r#"{"type":7,"error":"bye"}"#).await;

    let result = tokio::time::timeout(RECV_TIMEOUT, client.server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn end_of_stream_ends_the_loop() {
    let client = connect(quiet_config());
    let TestClient { writer, reader, server, .. } = client;
    drop(writer);
    drop(reader);

    let result = tokio::time::timeout(RECV_TIMEOUT, server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn keep_alive_pings() {
    let mut client =
        connect(quiet_config().with_keep_alive_interval(Some(Duration::from_millis(50))));

    assert_eq!(client.recv().await, json!({"type":6}));
    assert_eq!(client.recv().await, json!({"type":6}));
}

#[tokio::test]
async fn silent_client_times_out() {
    let mut client =
        connect(quiet_config().with_client_timeout(Some(Duration::from_millis(100))));

    assert_eq!(
        client.recv().await,
        json!({"type":7,"error":"client timeout","allowReconnect":true})
    );
    let result = tokio::time::timeout(RECV_TIMEOUT, client.server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
