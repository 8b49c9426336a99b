//! Streaming controller and receive worker
//!
//! Two states only: idle and streaming. While streaming, a dedicated worker
//! thread owns the receive path: it reads stream transfers, scans for the
//! frame delimiter, assembles a staging buffer, and publishes each finished
//! frame into the shared latest-frame slot with a single swap under a
//! briefly-held mutex. Readers therefore never observe a torn frame, and
//! `latest_frame` never blocks beyond that swap.
//!
//! The worker is controlled through the channel bridge in
//! [`common::channel`]; a stop command is observed within one read timeout.
//! On exit the worker releases the backend pipe itself, so a following
//! start always finds the pipe free.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use bytes::BytesMut;
use common::channel::{create_stream_bridge, StreamBridge, StreamCommand, StreamEvent, StreamWorker};
use common::stats::TransferStats;
use memchr::memmem;
use protocol::{FrameFormat, UsbError, FRAME_DELIMITER, STREAM_ENDPOINT, STREAM_TRANSFER_SIZE};
use tracing::{debug, warn};

use crate::backend::{DeviceIo, STREAM_READ_TIMEOUT};
use crate::error::{CameraError, Result};

/// A copy of the most recently published frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    /// True only when the frame assembled to exactly the expected length.
    /// Incomplete frames are delivered for diagnostic preview only.
    pub complete: bool,
    /// Frame bytes, 24 bpp.
    pub data: Vec<u8>,
}

impl FrameSnapshot {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Default)]
struct LatestFrame {
    data: Vec<u8>,
    complete: bool,
}

/// State shared between the worker (writer) and foreground readers.
struct SharedStream {
    latest: Mutex<LatestFrame>,
    stats: TransferStats,
}

struct WorkerHandle {
    bridge: StreamBridge,
    join: JoinHandle<()>,
}

/// Owns the stream lifecycle and the latest-frame slot.
pub struct StreamController {
    shared: Arc<SharedStream>,
    worker: Option<WorkerHandle>,
}

impl StreamController {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SharedStream {
                latest: Mutex::new(LatestFrame::default()),
                stats: TransferStats::new(),
            }),
            worker: None,
        }
    }

    /// Whether a worker is currently running.
    pub fn is_streaming(&self) -> bool {
        match &self.worker {
            Some(handle) => !handle.join.is_finished(),
            None => false,
        }
    }

    /// Arm the backend pipe and spawn the receive worker.
    pub(crate) fn start<D: DeviceIo>(&mut self, io: Arc<D>, format: FrameFormat) -> Result<()> {
        if self.is_streaming() {
            return Err(CameraError::StreamingActive);
        }
        // Reap a worker that already exited on its own (device loss).
        self.stop();

        io.stream_start(STREAM_ENDPOINT)?;

        {
            let mut latest = self.shared.latest.lock().unwrap();
            latest.data.clear();
            latest.complete = false;
        }

        let (bridge, worker) = create_stream_bridge();
        let shared = Arc::clone(&self.shared);
        let join = thread::Builder::new()
            .name("lumascope-stream".to_string())
            .spawn(move || run_worker(io, shared, worker, format))
            .map_err(|e| CameraError::Usb(UsbError::Other(e.to_string())))?;

        self.worker = Some(WorkerHandle { bridge, join });
        debug!("streaming worker started, frame {} bytes", format.frame_len());
        Ok(())
    }

    /// Stop the worker and wait for it to unwind. No-op when idle.
    pub fn stop(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.bridge.send_command(StreamCommand::Stop);
            if handle.join.join().is_err() {
                warn!("streaming worker panicked");
            }
            debug!("streaming worker stopped");
        }
    }

    /// Copy of the most recently published frame. Never blocks on the
    /// receive path; always returns immediately with whatever is buffered.
    pub fn latest_frame(&self) -> FrameSnapshot {
        let latest = self.shared.latest.lock().unwrap();
        FrameSnapshot {
            complete: latest.complete,
            data: latest.data.clone(),
        }
    }

    /// Cumulative stream bytes received since the last reset.
    pub fn bytes_received(&self) -> u64 {
        self.shared.stats.bytes_received()
    }

    /// Reset the byte counter to zero.
    pub fn reset_bytes_received(&self) {
        self.shared.stats.reset();
    }

    /// Drain pending worker events (diagnostics).
    pub fn drain_events(&self) -> Vec<StreamEvent> {
        match &self.worker {
            Some(handle) => handle.bridge.drain_events(),
            None => Vec::new(),
        }
    }
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<D: DeviceIo>(
    io: Arc<D>,
    shared: Arc<SharedStream>,
    worker: StreamWorker,
    format: FrameFormat,
) {
    let frame_len = format.frame_len();
    let mut assembler = FrameAssembler::new(frame_len);
    let mut transfer = vec![0u8; STREAM_TRANSFER_SIZE];

    loop {
        if let Some(StreamCommand::Stop) = worker.try_recv_command() {
            break;
        }

        match io.stream_read(&mut transfer, STREAM_READ_TIMEOUT) {
            Ok(0) => {}
            Ok(n) => {
                shared.stats.record_received(n as u64);
                for frame in assembler.consume(&transfer[..n]) {
                    publish(&shared, &worker, frame);
                }
            }
            Err(UsbError::Timeout) => {
                // The transfer window elapsed mid-frame: publish what we
                // have, flagged incomplete, and resync on the next
                // delimiter.
                if let Some(frame) = assembler.take_partial() {
                    publish(&shared, &worker, frame);
                }
            }
            Err(e) if e.is_fatal() => {
                warn!("stream receive failed fatally: {}", e);
                worker.send_event(StreamEvent::TransferError { error: e });
                break;
            }
            Err(e) => {
                debug!("transient stream error: {}", e);
                worker.send_event(StreamEvent::TransferError { error: e });
            }
        }
    }

    let _ = io.stream_stop();
    worker.send_event(StreamEvent::Stopped);
}

fn publish(shared: &SharedStream, worker: &StreamWorker, frame: FrameSnapshot) {
    let bytes = frame.len();
    let complete = frame.complete;
    {
        let mut latest = shared.latest.lock().unwrap();
        latest.data = frame.data;
        latest.complete = complete;
    }
    worker.send_event(StreamEvent::FramePublished { bytes, complete });
}

/// Delimiter-scanning frame assembly.
///
/// Data between two delimiters is one frame. Until the first delimiter is
/// seen, bytes are discarded — the stream may begin mid-frame after a
/// restart.
struct FrameAssembler {
    staging: BytesMut,
    frame_len: usize,
    in_frame: bool,
}

impl FrameAssembler {
    fn new(frame_len: usize) -> Self {
        Self {
            staging: BytesMut::with_capacity(frame_len + STREAM_TRANSFER_SIZE),
            frame_len,
            in_frame: false,
        }
    }

    /// Feed one transfer's worth of data; returns finished frames in order.
    fn consume(&mut self, mut chunk: &[u8]) -> Vec<FrameSnapshot> {
        let mut frames = Vec::new();

        loop {
            match memmem::find(chunk, &FRAME_DELIMITER) {
                Some(pos) => {
                    if self.in_frame {
                        self.staging.extend_from_slice(&chunk[..pos]);
                        if !self.staging.is_empty() {
                            frames.push(self.finish());
                        }
                    }
                    self.staging.clear();
                    self.in_frame = true;
                    chunk = &chunk[pos + FRAME_DELIMITER.len()..];
                }
                None => {
                    if self.in_frame {
                        self.staging.extend_from_slice(chunk);
                        while self.staging.len() >= self.frame_len {
                            let data = self.staging.split_to(self.frame_len).to_vec();
                            frames.push(FrameSnapshot {
                                complete: true,
                                data,
                            });
                        }
                    }
                    return frames;
                }
            }
        }
    }

    /// Take whatever is staged as an incomplete frame, if anything.
    fn take_partial(&mut self) -> Option<FrameSnapshot> {
        if !self.in_frame || self.staging.is_empty() {
            return None;
        }
        self.in_frame = false;
        Some(self.finish())
    }

    fn finish(&mut self) -> FrameSnapshot {
        let data = self.staging.split().to_vec();
        FrameSnapshot {
            complete: data.len() == self.frame_len,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delimited(payload: &[u8]) -> Vec<u8> {
        let mut v = FRAME_DELIMITER.to_vec();
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn test_single_frame_between_delimiters() {
        let mut assembler = FrameAssembler::new(6);
        let mut data = delimited(&[1, 2, 3, 4, 5, 6]);
        data.extend_from_slice(&FRAME_DELIMITER);

        let frames = assembler.consume(&data);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].complete);
        assert_eq!(frames[0].data, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_frame_completed_by_length() {
        let mut assembler = FrameAssembler::new(4);

        // Frame split across two transfers, no trailing delimiter yet.
        assert!(assembler.consume(&delimited(&[9, 9])).is_empty());
        let frames = assembler.consume(&[9, 9]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].complete);
        assert_eq!(frames[0].data, vec![9, 9, 9, 9]);

        // The following delimiter must not produce an empty publish.
        assert!(assembler.consume(&FRAME_DELIMITER).is_empty());
    }

    #[test]
    fn test_bytes_before_first_delimiter_discarded() {
        let mut assembler = FrameAssembler::new(3);
        let mut data = vec![0xAA, 0xBB];
        data.extend_from_slice(&delimited(&[1, 2, 3]));
        data.extend_from_slice(&FRAME_DELIMITER);

        let frames = assembler.consume(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn test_short_frame_flagged_incomplete() {
        let mut assembler = FrameAssembler::new(8);
        let mut data = delimited(&[1, 2, 3]);
        data.extend_from_slice(&FRAME_DELIMITER);

        let frames = assembler.consume(&data);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].complete);
        assert_eq!(frames[0].len(), 3);
    }

    #[test]
    fn test_take_partial_on_timeout() {
        let mut assembler = FrameAssembler::new(8);
        assert!(assembler.consume(&delimited(&[1, 2])).is_empty());

        let partial = assembler.take_partial().unwrap();
        assert!(!partial.complete);
        assert_eq!(partial.data, vec![1, 2]);

        // Nothing staged afterwards.
        assert!(assembler.take_partial().is_none());
    }

    #[test]
    fn test_multiple_frames_in_one_transfer() {
        let mut assembler = FrameAssembler::new(2);
        let mut data = delimited(&[1, 1]);
        data.extend_from_slice(&delimited(&[2, 2]));
        data.extend_from_slice(&FRAME_DELIMITER);

        let frames = assembler.consume(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, vec![1, 1]);
        assert_eq!(frames[1].data, vec![2, 2]);
    }
}
