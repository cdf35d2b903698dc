//! Streaming output watcher
//!
//! Accumulates stdout and stderr of a running command and rescans the whole
//! buffer with a [`Recognizer`] on every chunk. Resolves on the first match,
//! on process exit, or when the time budget runs out, whichever comes first.

use std::time::Duration;

use rl_protocol::Recognizer;

use crate::channel::{ExecEvent, ExecStream};
use crate::error::DiscoveryError;

/// A recognized value with the output that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognized<T> {
    /// The recognized value
    pub value: T,
    /// Output accumulated up to the match
    pub output: String,
}

/// Watch `stream` until `recognizer` matches
///
/// The stream is dropped on return, which abandons the command.
pub async fn watch_output<R>(
    stream: ExecStream,
    recognizer: &R,
    timeout: Duration,
) -> Result<Recognized<R::Output>, DiscoveryError>
where
    R: Recognizer,
{
    let mut output = String::new();
    let watched = tokio::time::timeout(timeout, scan(stream, recognizer, &mut output)).await;

    match watched {
        Ok(result) => result,
        Err(_) => Err(DiscoveryError::Timeout {
            elapsed: timeout,
            output,
        }),
    }
}

async fn scan<R>(
    mut stream: ExecStream,
    recognizer: &R,
    output: &mut String,
) -> Result<Recognized<R::Output>, DiscoveryError>
where
    R: Recognizer,
{
    // Bytes that may end in a split UTF-8 sequence
    let mut pending = Vec::new();

    while let Some(event) = stream.next().await {
        match event {
            ExecEvent::Stdout(data) | ExecEvent::Stderr(data) => {
                pending.extend_from_slice(&data);
                drain_utf8(&mut pending, output);
                if let Some(value) = recognizer.recognize(output) {
                    return Ok(Recognized {
                        value,
                        output: std::mem::take(output),
                    });
                }
            }
            ExecEvent::Exit(code) => return finish(recognizer, output, pending, Some(code)),
            ExecEvent::Closed => return finish(recognizer, output, pending, None),
        }
    }

    finish(recognizer, output, pending, None)
}

fn finish<R: Recognizer>(
    recognizer: &R,
    output: &mut String,
    pending: Vec<u8>,
    code: Option<u32>,
) -> Result<Recognized<R::Output>, DiscoveryError> {
    output.push_str(&String::from_utf8_lossy(&pending));
    let output = std::mem::take(output);

    match recognizer.recognize_final(&output) {
        Some(value) => Ok(Recognized { value, output }),
        None => Err(DiscoveryError::PrematureExit { code, output }),
    }
}

/// Move the longest valid UTF-8 prefix of `pending` into `output`
fn drain_utf8(pending: &mut Vec<u8>, output: &mut String) {
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                output.push_str(text);
                pending.clear();
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if let Ok(text) = std::str::from_utf8(&pending[..valid]) {
                    output.push_str(text);
                }
                match e.error_len() {
                    // Incomplete sequence at the end: wait for more bytes
                    None => {
                        pending.drain(..valid);
                        return;
                    }
                    Some(bad) => {
                        output.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                }
            }
        }
    }
}
