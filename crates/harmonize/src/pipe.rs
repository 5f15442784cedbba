//! Stream Pipe: decoder → bounded queue → encoder
//!
//! # Design
//!
//! - Producer and consumer run on two scoped threads joined by a
//!   `sync_channel` of fixed-size chunks, so at most
//!   `chunk_size * (capacity + 2)` bytes are buffered regardless of file size.
//! - A full queue blocks the producer; an empty queue blocks the consumer.
//! - The producer only sends `Frame::End` after a clean EOF *and* a clean
//!   decoder exit. A queue that closes without `End` makes the consumer abort
//!   the encoder, so a truncated decode can never be finalized.
//! - Either side failing drops its channel end; the other side notices on its
//!   next send/recv and aborts too.

use crate::cancel::CancellationToken;
use crate::codec::{DecodeStream, EncodeSink};
use crate::config::PipeConfig;
use crate::error::{CodecError, PipeError};
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};
use tracing::debug;

enum Frame {
    Data(Vec<u8>),
    End,
}

/// Why one side stopped.
enum SideError {
    /// This side failed; the error is what the transfer reports.
    Failed(PipeError),
    /// The other side went away first.
    PeerGone,
}

/// Stream all bytes from `producer` into `consumer`.
///
/// Returns the number of decoded bytes handed to the encoder. On error both
/// ends have been aborted and the encoder output must be discarded.
pub fn transfer(
    producer: Box<dyn DecodeStream>,
    consumer: Box<dyn EncodeSink>,
    config: &PipeConfig,
    cancel: &CancellationToken,
) -> Result<u64, PipeError> {
    let chunk_size = config.chunk_size.max(1);
    let (tx, rx) = mpsc::sync_channel::<Frame>(config.capacity.max(1));

    let (produced, consumed) = std::thread::scope(|scope| {
        let producer_thread = scope.spawn(move || produce(producer, tx, chunk_size, cancel));
        let consumer_thread = scope.spawn(move || consume(consumer, rx));
        (producer_thread.join(), consumer_thread.join())
    });

    let produced = produced.map_err(|_| PipeError::Panicked("decoder"))?;
    let consumed = consumed.map_err(|_| PipeError::Panicked("encoder"))?;

    match (produced, consumed) {
        (Ok(read), Ok(written)) => {
            debug!(read, written, "Stream transfer complete");
            Ok(written)
        }
        (Err(SideError::Failed(err)), _) | (_, Err(SideError::Failed(err))) => Err(err),
        // Each side only reports PeerGone after the other dropped its end,
        // which the other side does only on failure.
        (Err(SideError::PeerGone), _) | (_, Err(SideError::PeerGone)) => {
            Err(PipeError::Encode(CodecError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream closed unexpectedly",
            ))))
        }
    }
}

fn produce(
    mut producer: Box<dyn DecodeStream>,
    tx: SyncSender<Frame>,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> Result<u64, SideError> {
    let mut total: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            producer.abort();
            return Err(SideError::Failed(PipeError::Cancelled));
        }

        let mut chunk = vec![0u8; chunk_size];
        let n = match producer.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                producer.abort();
                return Err(SideError::Failed(PipeError::Decode(CodecError::Io(e))));
            }
        };
        chunk.truncate(n);
        total += n as u64;

        if tx.send(Frame::Data(chunk)).is_err() {
            producer.abort();
            return Err(SideError::PeerGone);
        }
    }

    // EOF on the stream is not success until the decoder says so
    producer
        .finish()
        .map_err(|e| SideError::Failed(PipeError::Decode(e)))?;

    if tx.send(Frame::End).is_err() {
        return Err(SideError::PeerGone);
    }
    Ok(total)
}

fn consume(mut consumer: Box<dyn EncodeSink>, rx: Receiver<Frame>) -> Result<u64, SideError> {
    let mut total: u64 = 0;
    loop {
        match rx.recv() {
            Ok(Frame::Data(chunk)) => {
                if let Err(e) = consumer.write_all(&chunk) {
                    drop(rx);
                    consumer.abort();
                    return Err(SideError::Failed(PipeError::Encode(CodecError::Io(e))));
                }
                total += chunk.len() as u64;
            }
            Ok(Frame::End) => {
                consumer
                    .finish()
                    .map_err(|e| SideError::Failed(PipeError::Encode(e)))?;
                return Ok(total);
            }
            Err(_) => {
                consumer.abort();
                return Err(SideError::PeerGone);
            }
        }
    }
}
