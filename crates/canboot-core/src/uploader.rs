//! Uploader - sequences the bootloader update protocol.
//!
//! An upload runs erase, begin-write, one write-data per 4-byte word,
//! end-write and a CRC request. Every command is a blocking round trip: the
//! next frame is only sent once the previous reply has been resolved by the
//! correlator. The first rejected or unanswered step aborts the upload; the
//! node is left in whatever state it reached.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::UploaderConfig;
use crate::correlator::{CorrelatorError, Outcome, ReplyKind, ResponseCorrelator};
use crate::events::{FrameDirection, TracingObserver, UploadEvent, UploadObserver, UploadPhase};
use crate::payload::{Chunk, ImageError, TransferJob};
use crate::protocol::constants::{ERASED_CRC, MAX_ADDRESSABLE_NODE_ID};
use crate::protocol::{Address, Command, Frame, FrameError};
use crate::transport::{BusTransport, FrameSink, TransportError};

/// Protocol step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Erase,
    BeginWrite,
    WriteData { offset: usize },
    EndWrite,
    RequestCrc,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Erase => write!(f, "erase"),
            Step::BeginWrite => write!(f, "begin write"),
            Step::WriteData { offset } => write!(f, "write data at offset {}", offset),
            Step::EndWrite => write!(f, "end write"),
            Step::RequestCrc => write!(f, "CRC request"),
        }
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Timeout after {timeout_ms}ms waiting for {step} reply")]
    Timeout { step: Step, timeout_ms: u64 },

    #[error("Node rejected {step} (status 0x{status:02X})")]
    Rejected { step: Step, status: u8 },

    #[error("CRC mismatch: local 0x{local:08X}, node 0x{remote:08X}{}", fill_note(.pad))]
    ChecksumMismatch { local: u32, remote: u32, pad: usize },

    #[error("Unexpected reply to {step}")]
    UnexpectedReply { step: Step },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Correlator(#[from] CorrelatorError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Image(#[from] ImageError),
}

fn fill_note(pad: &usize) -> String {
    if *pad == 0 {
        String::new()
    } else {
        format!(" (local CRC excludes {} fill byte(s) of the last word)", pad)
    }
}

impl UploadError {
    /// Byte offset of the word that failed, for data-write failures.
    pub fn offset(&self) -> Option<usize> {
        match self {
            UploadError::Timeout {
                step: Step::WriteData { offset },
                ..
            }
            | UploadError::Rejected {
                step: Step::WriteData { offset },
                ..
            }
            | UploadError::UnexpectedReply {
                step: Step::WriteData { offset },
            } => Some(*offset),
            _ => None,
        }
    }
}

/// Summary of a verified upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    /// Source bytes written (excluding fill).
    pub bytes: usize,
    /// Write-data commands sent.
    pub chunks: usize,
    /// CRC32 confirmed by both sides.
    pub crc: u32,
    pub elapsed: Duration,
}

/// Application state reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationStatus {
    pub crc: u32,
    /// False when the application area reads back as erased flash.
    pub programmed: bool,
}

/// Forwards inbound frames to the correlator, reporting them on the way.
struct ObservedSink<O: UploadObserver> {
    correlator: Arc<ResponseCorrelator>,
    observer: Arc<O>,
}

impl<O: UploadObserver> FrameSink for ObservedSink<O> {
    fn on_frame(&self, frame: &Frame) {
        self.observer.on_event(&UploadEvent::Frame {
            direction: FrameDirection::Rx,
            frame: *frame,
        });
        self.correlator.handle_frame(frame);
    }
}

/// Nodes above 0x0F would push command identifiers past 11 bits.
fn check_node_id(node_id: u8) -> Result<(), FrameError> {
    if node_id > MAX_ADDRESSABLE_NODE_ID {
        return Err(FrameError::InvalidNodeId { node_id });
    }
    Ok(())
}

/// Bootloader client for one node on one bus.
pub struct Uploader<T: BusTransport, O: UploadObserver = TracingObserver> {
    transport: T,
    correlator: Arc<ResponseCorrelator>,
    observer: Arc<O>,
    node_id: u8,
    ack_timeout: Duration,
    checksum_timeout: Duration,
    progress_interval: usize,
    phase: UploadPhase,
}

impl<T: BusTransport> Uploader<T, TracingObserver> {
    /// Create an uploader with the default tracing observer.
    pub fn new(transport: T, config: &UploaderConfig) -> Result<Self, UploadError> {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: BusTransport, O: UploadObserver + 'static> Uploader<T, O> {
    /// Create an uploader with a custom observer and register it as the
    /// transport's frame receiver.
    pub fn with_observer(
        transport: T,
        config: &UploaderConfig,
        observer: Arc<O>,
    ) -> Result<Self, UploadError> {
        check_node_id(config.node_id)?;

        let correlator = Arc::new(ResponseCorrelator::new());
        transport.set_receiver(Arc::new(ObservedSink {
            correlator: Arc::clone(&correlator),
            observer: Arc::clone(&observer),
        }));

        Ok(Self {
            transport,
            correlator,
            observer,
            node_id: config.node_id,
            ack_timeout: config.ack_timeout(),
            checksum_timeout: config.checksum_timeout(),
            progress_interval: config.progress_interval.max(1),
            phase: UploadPhase::Idle,
        })
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Retarget to another node. Takes `&mut self`, so it cannot overlap a
    /// round trip.
    pub fn set_node_id(&mut self, node_id: u8) -> Result<(), UploadError> {
        check_node_id(node_id)?;
        self.node_id = node_id;
        info!(node = %format!("0x{:02X}", node_id), "Node ID set");
        Ok(())
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    fn emit(&self, event: UploadEvent) {
        self.observer.on_event(&event);
    }

    fn enter(&mut self, phase: UploadPhase) {
        let from = self.phase;
        self.phase = phase;
        self.emit(UploadEvent::PhaseChanged { from, to: phase });
    }

    /// Send one command and block for its reply.
    ///
    /// The expectation is armed before the frame goes out so a fast reply is
    /// never missed. Rejections and timeouts come back as an [`Outcome`];
    /// only local failures are errors.
    pub fn round_trip(
        &self,
        command: u8,
        payload: &[u8],
        kind: ReplyKind,
        timeout: Duration,
    ) -> Result<Outcome, UploadError> {
        let frame = Frame::new(Address::new(self.node_id, command)?, payload)?;
        let pending = self.correlator.expect(kind)?;

        self.transport.transmit(&frame)?;
        self.emit(UploadEvent::Frame {
            direction: FrameDirection::Tx,
            frame,
        });

        Ok(pending.wait(timeout))
    }

    fn acknowledged(&self, step: Step, command: Command, payload: &[u8]) -> Result<(), UploadError> {
        match self.round_trip(
            command.code(),
            payload,
            ReplyKind::Acknowledgement,
            self.ack_timeout,
        )? {
            Outcome::Confirmed => Ok(()),
            Outcome::Rejected(status) => Err(UploadError::Rejected { step, status }),
            Outcome::TimedOut => Err(UploadError::Timeout {
                step,
                timeout_ms: self.ack_timeout.as_millis() as u64,
            }),
            Outcome::ChecksumReceived(_) => Err(UploadError::UnexpectedReply { step }),
        }
    }

    /// Erase the application area.
    pub fn erase(&self) -> Result<(), UploadError> {
        debug!(node = %format!("0x{:02X}", self.node_id), "Sending erase command");
        self.acknowledged(Step::Erase, Command::Erase, &[])
    }

    /// Open a write sequence.
    pub fn begin_write(&self) -> Result<(), UploadError> {
        debug!("Sending start write command");
        self.acknowledged(Step::BeginWrite, Command::BeginWrite, &[])
    }

    /// Program one word.
    pub fn write_chunk(&self, chunk: &Chunk) -> Result<(), UploadError> {
        trace!(offset = chunk.offset, word = ?chunk.word, "Writing word");
        self.acknowledged(
            Step::WriteData {
                offset: chunk.offset,
            },
            Command::WriteData,
            &chunk.word,
        )
    }

    /// Close the write sequence.
    pub fn end_write(&self) -> Result<(), UploadError> {
        debug!("Sending end write command");
        self.acknowledged(Step::EndWrite, Command::EndWrite, &[])
    }

    /// Ask the node for the CRC32 of its application area.
    pub fn query_checksum(&self) -> Result<u32, UploadError> {
        let step = Step::RequestCrc;
        match self.round_trip(
            Command::RequestCrc.code(),
            &[],
            ReplyKind::Checksum,
            self.checksum_timeout,
        )? {
            Outcome::ChecksumReceived(crc) => {
                debug!(crc = %format!("0x{:08X}", crc), "Node CRC");
                Ok(crc)
            }
            Outcome::TimedOut => Err(UploadError::Timeout {
                step,
                timeout_ms: self.checksum_timeout.as_millis() as u64,
            }),
            Outcome::Rejected(status) => Err(UploadError::Rejected { step, status }),
            Outcome::Confirmed => Err(UploadError::UnexpectedReply { step }),
        }
    }

    /// Read the node's application CRC and whether anything is programmed.
    pub fn application_status(&self) -> Result<ApplicationStatus, UploadError> {
        let crc = self.query_checksum()?;
        Ok(ApplicationStatus {
            crc,
            programmed: crc != ERASED_CRC,
        })
    }

    /// Write `data` to the node and verify it by CRC.
    #[instrument(skip(self, data), fields(node = self.node_id, len = data.len()))]
    pub fn upload(&mut self, data: &[u8]) -> Result<UploadReport, UploadError> {
        if data.is_empty() {
            return Err(ImageError::Empty.into());
        }

        self.phase = UploadPhase::Idle;
        let started = Instant::now();
        let mut job = TransferJob::new(data);

        match self.run_upload(&mut job) {
            Ok(crc) => {
                self.enter(UploadPhase::Done);
                self.emit(UploadEvent::Complete { bytes: data.len() });
                let report = UploadReport {
                    bytes: data.len(),
                    chunks: job.total_chunks(),
                    crc,
                    elapsed: started.elapsed(),
                };
                info!(
                    bytes = report.bytes,
                    chunks = report.chunks,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "CRC verification passed"
                );
                Ok(report)
            }
            Err(e) => {
                self.enter(UploadPhase::Failed);
                self.emit(UploadEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn run_upload(&mut self, job: &mut TransferJob<'_>) -> Result<u32, UploadError> {
        let local = job.local_crc();
        info!(
            size = job.total_len(),
            chunks = job.total_chunks(),
            crc = %format!("0x{:08X}", local),
            "Starting upload"
        );
        if job.pad_len() > 0 {
            // Local CRC covers only the source bytes, not the fill.
            info!(
                pad = job.pad_len(),
                "Image not word-aligned, last word padded with 0xFF outside the local CRC"
            );
        }

        self.enter(UploadPhase::Erasing);
        self.erase()?;

        self.enter(UploadPhase::BeginWrite);
        self.begin_write()?;

        self.enter(UploadPhase::Writing);
        let total = job.total_len();
        let mut written = 0usize;
        while let Some(chunk) = job.next_chunk() {
            if let Err(e) = self.write_chunk(&chunk) {
                error!(offset = chunk.offset, "Write word failed");
                warn!(successful = written, failed = 1, "Write aborted");
                return Err(e);
            }
            written += 1;

            let position = job.bytes_sent();
            let previous = position - chunk.len;
            if position / self.progress_interval > previous / self.progress_interval
                || job.is_done()
            {
                self.emit(UploadEvent::Progress {
                    current: position,
                    total,
                });
            }
        }
        info!(successful = written, "Download completed");

        self.enter(UploadPhase::EndWrite);
        self.end_write()?;

        self.enter(UploadPhase::Verifying);
        let remote = self.query_checksum()?;
        self.emit(UploadEvent::ChecksumCompared { local, remote });
        info!(
            device = %format!("0x{:08X}", remote),
            local = %format!("0x{:08X}", local),
            "Comparing CRC"
        );

        if remote != local {
            return Err(UploadError::ChecksumMismatch {
                local,
                remote,
                pad: job.pad_len(),
            });
        }
        Ok(local)
    }
}
