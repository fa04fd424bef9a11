use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use hubwire_frame::{FrameReader, FrameWriter};
use hubwire_protocol::{decode_message, encode_payload, HubMessage, InvocationMessage, RawPayload};
use hubwire_transport::ListenAddr;
use serde_json::Value;

use crate::cmd::{parse_duration, InvokeArgs};
use crate::exit::{
    decode_error, frame_error, io_error, protocol_error, transport_error, CliError, CliResult,
    FAILURE, SUCCESS, USAGE,
};
use crate::output::{print_message, OutputFormat};

/// A connected blocking client socket.
enum ClientStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl ClientStream {
    fn connect(addr: &str, timeout: Duration) -> CliResult<Self> {
        let addr = addr
            .parse::<ListenAddr>()
            .map_err(|err| transport_error("connect failed", err))?;
        let stream = match addr {
            ListenAddr::Tcp(addr) => Self::Tcp(
                TcpStream::connect(&addr)
                    .map_err(|err| io_error(&format!("connect to {addr} failed"), err))?,
            ),
            #[cfg(unix)]
            ListenAddr::Unix(path) => Self::Unix(
                std::os::unix::net::UnixStream::connect(&path).map_err(|err| {
                    io_error(&format!("connect to {} failed", path.display()), err)
                })?,
            ),
        };
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|err| io_error("socket setup failed", err))?;
        Ok(stream)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }

    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

pub fn run(args: InvokeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let request = build_request(&args)?;
    let payload =
        encode_payload(&request).map_err(|err| protocol_error("encode failed", err))?;

    let stream = ClientStream::connect(&args.addr, timeout)?;
    let mut writer = FrameWriter::new(
        stream
            .try_clone()
            .map_err(|err| io_error("socket setup failed", err))?,
    );
    let mut reader = FrameReader::new(stream);

    writer
        .send(&payload)
        .map_err(|err| frame_error("send failed", err))?;
    tracing::debug!(target_method = %args.target, size = payload.len(), "invocation sent");

    if args.no_wait {
        return Ok(SUCCESS);
    }

    loop {
        let frame = reader
            .read_frame()
            .map_err(|err| frame_error("receive failed", err))?;
        let message =
            decode_message(&frame.payload).map_err(|err| decode_error("receive failed", err))?;

        match reply_disposition(&message, &args.id) {
            Disposition::Skip => {
                tracing::trace!(message_type = message.name(), "skipping unrelated message");
            }
            Disposition::Item => print_message(&message, &frame.payload, format),
            Disposition::Done { failed } => {
                print_message(&message, &frame.payload, format);
                return Ok(if failed { FAILURE } else { SUCCESS });
            }
            Disposition::Closed(reason) => {
                return Err(CliError::new(
                    FAILURE,
                    format!(
                        "server closed the connection{}",
                        reason.map(|r| format!(": {r}")).unwrap_or_default()
                    ),
                ));
            }
        }
    }
}

fn build_request(args: &InvokeArgs) -> CliResult<HubMessage> {
    let arguments = parse_arguments(args.args.as_deref())?;
    let mut invocation = InvocationMessage::new(&args.target, arguments);
    if !args.no_wait {
        invocation = invocation.with_invocation_id(&args.id);
    }
    Ok(if args.stream {
        HubMessage::StreamInvocation(invocation)
    } else {
        HubMessage::Invocation(invocation)
    })
}

fn parse_arguments(input: Option<&str>) -> CliResult<Vec<RawPayload>> {
    let Some(input) = input else {
        return Ok(Vec::new());
    };
    let value: Value = serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("--args is not valid JSON: {err}")))?;
    let values = match value {
        Value::Array(values) => values,
        single => vec![single],
    };
    values
        .iter()
        .map(RawPayload::from_value)
        .collect::<Result<_, _>>()
        .map_err(|err| CliError::new(USAGE, format!("--args could not be encoded: {err}")))
}

#[derive(Debug, PartialEq)]
enum Disposition {
    Skip,
    Item,
    Done { failed: bool },
    Closed(Option<String>),
}

fn reply_disposition(message: &HubMessage, invocation_id: &str) -> Disposition {
    match message {
        HubMessage::StreamItem(item) if item.invocation_id == invocation_id => Disposition::Item,
        HubMessage::Completion(completion) if completion.invocation_id == invocation_id => {
            Disposition::Done {
                failed: completion.is_error(),
            }
        }
        HubMessage::Close(close) => Disposition::Closed(close.error.clone()),
        _ => Disposition::Skip,
    }
}
