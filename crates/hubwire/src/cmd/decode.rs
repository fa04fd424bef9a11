use std::fs::File;
use std::io::{self, Read};

use hubwire_frame::{FrameError, FrameReader};
use hubwire_protocol::decode_message;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let input: Box<dyn Read> = match &args.file {
        Some(path) => Box::new(File::open(path).map_err(|err| {
            io_error(&format!("failed reading {}", path.display()), err)
        })?),
        None => Box::new(io::stdin().lock()),
    };

    let summary = decode_all(FrameReader::new(input), format)?;
    tracing::debug!(
        decoded = summary.decoded,
        failed = summary.failed,
        "decode finished"
    );
    Ok(if summary.failed > 0 {
        DATA_INVALID
    } else {
        SUCCESS
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    decoded: usize,
    failed: usize,
}

fn decode_all<R: Read>(mut reader: FrameReader<R>, format: OutputFormat) -> CliResult<Summary> {
    let mut summary = Summary::default();
    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::EndOfStream) => return Ok(summary),
            Err(FrameError::Truncated { pending }) => {
                tracing::warn!(pending, "input ends inside a frame");
                summary.failed += 1;
                return Ok(summary);
            }
            Err(err) => return Err(frame_error("read failed", err)),
        };

        match decode_message(&frame.payload) {
            Ok(message) => {
                print_message(&message, &frame.payload, format);
                summary.decoded += 1;
            }
            Err(err) => {
                eprintln!("error: frame {}: {err}", summary.decoded + summary.failed + 1);
                summary.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn summary(input: &[u8]) -> Summary {
        decode_all(FrameReader::new(Cursor::new(input.to_vec())), OutputFormat::Pretty).unwrap()
    }

    #[test]
    fn counts_good_and_bad_frames() {
        let input = b"{\"type\":6}\x1e{\"type\":1,\"target\":\"x\"}\x1enot json\x1e";
        assert_eq!(
            summary(input),
            Summary {
                decoded: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn trailing_partial_frame_is_a_failure() {
        let input = b"{\"type\":6}\x1e{\"type\":";
        assert_eq!(
            summary(input),
            Summary {
                decoded: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn empty_input_is_fine() {
        assert_eq!(summary(b""), Summary::default());
    }
}
