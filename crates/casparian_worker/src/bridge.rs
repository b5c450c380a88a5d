//! Guest bridge: spawns the parser subprocess and streams framed record
//! batches over a local IPC socket.
//!
//! ## Transport
//! Unix domain socket on unix, loopback TCP elsewhere. The guest receives
//! the endpoint as an argument and connects back to its parent worker.
//!
//! ## Frame format
//! Every frame starts with a u32 big-endian length. Two values are reserved:
//! `0xFFFF_FFFF` announces a CONCLUDE control message and `0xFFFF_FFFE` a
//! PROGRESS message, each followed by a length-prefixed JSON body. Any other
//! length is an Arrow IPC stream payload carrying record batches.
//!
//! ## Timeouts
//! - startup: guest must connect within `startup_timeout` (`guest_startup_timeout`)
//! - idle: frames must keep arriving within `idle_timeout` (`guest_idle_timeout`);
//!   progress frames reset the idle clock without carrying data

use arrow::array::RecordBatch;
use arrow::ipc::reader::StreamReader;
use casparian_protocol::defaults::ABORT_GRACE_MS;
use casparian_protocol::types::{ErrorKind, JobId};
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::{JobError, JobResult};

const FRAME_HEADER_SIZE: usize = 4;
const CONCLUDE_SIGNAL: u32 = 0xFFFF_FFFF;
const PROGRESS_SIGNAL: u32 = 0xFFFF_FFFE;

/// Cap per Arrow IPC payload; larger frames indicate a corrupted stream.
const MAX_BATCH_SIZE: u32 = 100 * 1024 * 1024;
const MAX_CONTROL_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Poll interval for cancellation checks while reading.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[cfg(unix)]
mod ipc {
    use super::JobId;
    use std::io;
    use std::path::Path;

    pub type Listener = std::os::unix::net::UnixListener;
    pub type Stream = std::os::unix::net::UnixStream;

    pub fn bind(work_dir: &Path, job_id: JobId) -> io::Result<(Listener, String)> {
        let path = work_dir.join(format!("guest_{job_id}.sock"));
        let listener = Listener::bind(&path)?;
        Ok((listener, path.display().to_string()))
    }

    #[cfg(test)]
    pub fn connect(endpoint: &str) -> io::Result<Stream> {
        Stream::connect(endpoint)
    }
}

#[cfg(not(unix))]
mod ipc {
    use super::JobId;
    use std::io;
    use std::path::Path;

    pub type Listener = std::net::TcpListener;
    pub type Stream = std::net::TcpStream;

    pub fn bind(_work_dir: &Path, _job_id: JobId) -> io::Result<(Listener, String)> {
        let listener = Listener::bind("127.0.0.1:0")?;
        let endpoint = listener.local_addr()?.to_string();
        Ok((listener, endpoint))
    }

    #[cfg(test)]
    pub fn connect(endpoint: &str) -> io::Result<Stream> {
        Stream::connect(endpoint)
    }
}

/// Bridge execution configuration (plain data, no behavior).
#[derive(Debug)]
pub struct BridgeConfig {
    pub interpreter: PathBuf,
    pub shim_path: PathBuf,
    pub parser_path: PathBuf,
    pub contract_path: PathBuf,
    pub input_path: String,
    pub job_id: JobId,
    /// Directory the IPC socket lives in; owned by the job's temp dir.
    pub work_dir: PathBuf,
    pub startup_timeout: Duration,
    pub idle_timeout: Duration,
    pub cancel: CancellationToken,
}

/// Progress frame body: `{rows_emitted, bytes_read}`, observability only.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestProgress {
    pub rows_emitted: u64,
    pub bytes_read: u64,
}

/// Conclude frame body sent by the guest as its final marker.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestConclude {
    pub outcome: String,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl GuestConclude {
    fn succeeded(&self) -> bool {
        self.outcome == "succeeded"
    }

    fn failure_kind(&self) -> ErrorKind {
        self.error_kind
            .as_deref()
            .and_then(|raw| ErrorKind::from_str(raw).ok())
            .unwrap_or(ErrorKind::ParserError)
    }
}

/// Spawn the guest and stream its batches into `on_batch`.
///
/// Synchronous; run under `spawn_blocking`. Returns once the guest has sent
/// its CONCLUDE marker and exited cleanly. Cancellation terminates the guest
/// (politely first, SIGKILL after the grace interval) and surfaces as
/// `ErrorKind::Cancelled`.
pub fn run_guest(
    config: &BridgeConfig,
    on_batch: &mut dyn FnMut(RecordBatch) -> JobResult<()>,
) -> JobResult<()> {
    let job_id = config.job_id;

    let (listener, endpoint) = ipc::bind(&config.work_dir, job_id).map_err(|e| {
        JobError::new(
            ErrorKind::GuestCrashed,
            format!("failed to bind guest IPC socket: {e}"),
        )
    })?;
    debug!("[Job {}] Guest IPC listening at {}", job_id, endpoint);

    let mut child = spawn_guest(config, &endpoint)?;

    let result = drive_guest(config, &listener, &mut child, on_batch);

    match result {
        Ok(()) => {
            let status = wait_for_exit(&mut child, job_id, &config.cancel)?;
            if !status.success() {
                let stderr = collect_stderr(&mut child);
                return Err(JobError::new(
                    ErrorKind::GuestCrashed,
                    format!(
                        "guest exited with {} after conclude: {}",
                        status,
                        tail_of(&stderr)
                    ),
                ));
            }
            Ok(())
        }
        Err(err) => {
            let stderr = terminate_guest(&mut child);
            if err.kind == ErrorKind::Cancelled {
                return Err(err);
            }
            // Fold any stderr into the failure message for diagnosis.
            if stderr.is_empty() {
                Err(err)
            } else {
                Err(JobError::new(
                    err.kind,
                    format!("{} (guest stderr: {})", err.message, tail_of(&stderr)),
                ))
            }
        }
    }
}

fn drive_guest(
    config: &BridgeConfig,
    listener: &ipc::Listener,
    child: &mut Child,
    on_batch: &mut dyn FnMut(RecordBatch) -> JobResult<()>,
) -> JobResult<()> {
    let mut stream = accept_with_timeout(listener, config, child)?;
    debug!("[Job {}] Guest connected", config.job_id);

    if let Err(e) = stream.set_read_timeout(Some(CANCEL_POLL_INTERVAL)) {
        warn!("[Job {}] Could not set read timeout: {}", config.job_id, e);
    }

    let conclude = read_guest_frames(
        &mut stream,
        config.job_id,
        config.idle_timeout,
        &config.cancel,
        on_batch,
    )?;

    if conclude.succeeded() {
        Ok(())
    } else {
        Err(JobError::new(
            conclude.failure_kind(),
            conclude
                .message
                .unwrap_or_else(|| "guest reported failure without message".to_string()),
        ))
    }
}

/// Spawn the guest subprocess.
///
/// Arguments, in order: input path, IPC endpoint, job id, parser source
/// path, serialized schema contract path.
fn spawn_guest(config: &BridgeConfig, endpoint: &str) -> JobResult<Child> {
    let mut cmd = Command::new(&config.interpreter);
    cmd.arg(&config.shim_path)
        .arg(&config.input_path)
        .arg(endpoint)
        .arg(config.job_id.to_string())
        .arg(&config.parser_path)
        .arg(&config.contract_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|e| {
        JobError::new(
            ErrorKind::GuestCrashed,
            format!(
                "failed to spawn guest (interpreter {}): {}",
                config.interpreter.display(),
                e
            ),
        )
    })?;

    info!(
        "[Job {}] Spawned guest pid={} interpreter={}",
        config.job_id,
        child.id(),
        config.interpreter.display()
    );
    Ok(child)
}

/// Accept the guest's connect, polling for child death and cancellation.
fn accept_with_timeout(
    listener: &ipc::Listener,
    config: &BridgeConfig,
    child: &mut Child,
) -> JobResult<ipc::Stream> {
    let job_id = config.job_id;
    listener.set_nonblocking(true).map_err(|e| {
        JobError::new(
            ErrorKind::GuestCrashed,
            format!("failed to set listener non-blocking: {e}"),
        )
    })?;

    let start = Instant::now();
    let poll = Duration::from_millis(100);

    loop {
        if config.cancel.is_cancelled() {
            return Err(JobError::new(ErrorKind::Cancelled, "cancelled before guest connected"));
        }
        if start.elapsed() >= config.startup_timeout {
            return Err(JobError::new(
                ErrorKind::GuestStartupTimeout,
                format!(
                    "guest did not connect within {:.1}s",
                    config.startup_timeout.as_secs_f64()
                ),
            ));
        }

        // Try to accept first - a connect may be queued even if the process
        // already exited.
        match listener.accept() {
            Ok((stream, _)) => {
                let _ = stream.set_read_timeout(Some(CANCEL_POLL_INTERVAL));
                stream.set_nonblocking(false).map_err(|e| {
                    JobError::new(
                        ErrorKind::GuestCrashed,
                        format!("failed to set stream blocking: {e}"),
                    )
                })?;
                return Ok(stream);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => {
                return Err(JobError::new(
                    ErrorKind::GuestCrashed,
                    format!("failed to accept guest connection: {e}"),
                ));
            }
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let stderr = collect_stderr(child);
                return Err(JobError::new(
                    ErrorKind::GuestCrashed,
                    format!(
                        "guest exited with {} before connecting: {}",
                        status,
                        tail_of(&stderr)
                    ),
                ));
            }
            Ok(None) => std::thread::sleep(poll),
            Err(e) => {
                return Err(JobError::new(
                    ErrorKind::GuestCrashed,
                    format!("failed to check guest status: {e}"),
                ));
            }
        }
    }
}

/// Read frames until CONCLUDE. Batches flow through `on_batch` in send order.
fn read_guest_frames(
    stream: &mut ipc::Stream,
    job_id: JobId,
    idle_timeout: Duration,
    cancel: &CancellationToken,
    on_batch: &mut dyn FnMut(RecordBatch) -> JobResult<()>,
) -> JobResult<GuestConclude> {
    let mut batch_count = 0u64;
    let mut last_activity = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Err(JobError::new(ErrorKind::Cancelled, "cancelled during guest stream"));
        }

        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        match stream.read_exact(&mut header_buf) {
            Ok(()) => last_activity = Instant::now(),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(JobError::new(
                    ErrorKind::GuestCrashed,
                    format!("guest closed the stream without conclude after {batch_count} batches"),
                ));
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if last_activity.elapsed() >= idle_timeout {
                    return Err(JobError::new(
                        ErrorKind::GuestIdleTimeout,
                        format!(
                            "no output or progress within {:.0}s ({} batches so far)",
                            idle_timeout.as_secs_f64(),
                            batch_count
                        ),
                    ));
                }
                continue;
            }
            Err(e) => {
                return Err(JobError::new(
                    ErrorKind::GuestCrashed,
                    format!("failed to read frame header: {e}"),
                ));
            }
        }

        let length = u32::from_be_bytes(header_buf);

        if length == CONCLUDE_SIGNAL {
            let body = read_control_body(stream, job_id)?;
            let conclude: GuestConclude = serde_json::from_slice(&body).map_err(|e| {
                JobError::new(ErrorKind::GuestCrashed, format!("malformed conclude frame: {e}"))
            })?;
            debug!(
                "[Job {}] Guest concluded '{}' after {} batches",
                job_id, conclude.outcome, batch_count
            );
            return Ok(conclude);
        }

        if length == PROGRESS_SIGNAL {
            let body = read_control_body(stream, job_id)?;
            match serde_json::from_slice::<GuestProgress>(&body) {
                Ok(progress) => debug!(
                    "[Job {}] Guest progress: {} rows, {} bytes read",
                    job_id, progress.rows_emitted, progress.bytes_read
                ),
                Err(e) => warn!("[Job {}] Unreadable progress frame: {}", job_id, e),
            }
            continue;
        }

        if length > MAX_BATCH_SIZE {
            return Err(JobError::new(
                ErrorKind::GuestCrashed,
                format!("batch frame of {length} bytes exceeds {MAX_BATCH_SIZE} byte cap"),
            ));
        }

        let mut ipc_buf = vec![0u8; length as usize];
        stream.read_exact(&mut ipc_buf).map_err(|e| {
            JobError::new(
                ErrorKind::GuestCrashed,
                format!("failed to read batch payload ({length} bytes): {e}"),
            )
        })?;

        let cursor = std::io::Cursor::new(ipc_buf);
        let reader = StreamReader::try_new(cursor, None).map_err(|e| {
            JobError::new(
                ErrorKind::GuestCrashed,
                format!("failed to parse Arrow IPC stream: {e}"),
            )
        })?;

        for batch in reader {
            let batch = batch.map_err(|e| {
                JobError::new(
                    ErrorKind::GuestCrashed,
                    format!("failed to decode Arrow batch: {e}"),
                )
            })?;
            on_batch(batch)?;
            batch_count += 1;
        }
        last_activity = Instant::now();
    }
}

fn read_control_body(stream: &mut ipc::Stream, job_id: JobId) -> JobResult<Vec<u8>> {
    let mut len_buf = [0u8; FRAME_HEADER_SIZE];
    read_fully(stream, &mut len_buf).map_err(|e| {
        JobError::new(
            ErrorKind::GuestCrashed,
            format!("[Job {job_id}] failed to read control length: {e}"),
        )
    })?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_CONTROL_MESSAGE_SIZE {
        return Err(JobError::new(
            ErrorKind::GuestCrashed,
            format!("control message of {len} bytes exceeds {MAX_CONTROL_MESSAGE_SIZE} byte cap"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    read_fully(stream, &mut body).map_err(|e| {
        JobError::new(
            ErrorKind::GuestCrashed,
            format!("[Job {job_id}] failed to read control body: {e}"),
        )
    })?;
    Ok(body)
}

/// read_exact that rides through the poll-interval read timeout.
fn read_fully(stream: &mut ipc::Stream, buf: &mut [u8]) -> std::io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed mid-message",
                ))
            }
            Ok(n) => filled += n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Wait for guest exit, honoring cancellation with the grace-kill path.
fn wait_for_exit(
    child: &mut Child,
    job_id: JobId,
    cancel: &CancellationToken,
) -> JobResult<std::process::ExitStatus> {
    loop {
        if cancel.is_cancelled() {
            terminate_guest(child);
            return Err(JobError::new(ErrorKind::Cancelled, "cancelled while waiting for guest exit"));
        }
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => std::thread::sleep(CANCEL_POLL_INTERVAL),
            Err(e) => {
                return Err(JobError::new(
                    ErrorKind::GuestCrashed,
                    format!("[Job {job_id}] failed to wait for guest: {e}"),
                ));
            }
        }
    }
}

/// Terminate the guest: give it the grace interval to exit on its own (its
/// socket is gone by now), then kill. Returns captured stderr.
fn terminate_guest(child: &mut Child) -> String {
    let grace = Duration::from_millis(ABORT_GRACE_MS);
    let start = Instant::now();
    while start.elapsed() < grace {
        match child.try_wait() {
            Ok(Some(_)) => return collect_stderr(child),
            Ok(None) => std::thread::sleep(Duration::from_millis(100)),
            Err(_) => break,
        }
    }
    let _ = child.kill();
    let _ = child.wait();
    collect_stderr(child)
}

/// Collect stderr from the child (consumes the handle).
fn collect_stderr(child: &mut Child) -> String {
    if let Some(mut stderr) = child.stderr.take() {
        let mut output = String::new();
        match stderr.read_to_string(&mut output) {
            Ok(_) => output.trim().to_string(),
            Err(e) => format!("(failed to read stderr: {e})"),
        }
    } else {
        String::new()
    }
}

fn tail_of(text: &str) -> &str {
    if text.is_empty() {
        return "(no stderr output)";
    }
    let max = 2048;
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::ipc::writer::StreamWriter;
    use std::io::Write;
    use std::sync::Arc;

    fn make_batch(values: &[i64]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values.to_vec()))]).unwrap()
    }

    fn write_batch_frame(stream: &mut impl Write, batch: &RecordBatch) {
        let mut sink = Vec::new();
        let mut writer = StreamWriter::try_new(&mut sink, &batch.schema()).unwrap();
        writer.write(batch).unwrap();
        writer.finish().unwrap();
        stream.write_all(&(sink.len() as u32).to_be_bytes()).unwrap();
        stream.write_all(&sink).unwrap();
    }

    fn write_control_frame(stream: &mut impl Write, signal: u32, body: &str) {
        stream.write_all(&signal.to_be_bytes()).unwrap();
        stream
            .write_all(&(body.len() as u32).to_be_bytes())
            .unwrap();
        stream.write_all(body.as_bytes()).unwrap();
    }

    fn bind_test_listener(dir: &std::path::Path) -> (ipc::Listener, String) {
        ipc::bind(dir, JobId::new(1)).unwrap()
    }

    fn accept_test(listener: &ipc::Listener) -> ipc::Stream {
        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        stream
    }

    #[test]
    fn test_frames_batches_progress_conclude() {
        let dir = tempfile::tempdir().unwrap();
        let (listener, endpoint) = bind_test_listener(dir.path());

        let writer = std::thread::spawn(move || {
            let mut stream = ipc::connect(&endpoint).unwrap();
            write_batch_frame(&mut stream, &make_batch(&[1, 2]));
            write_control_frame(
                &mut stream,
                PROGRESS_SIGNAL,
                r#"{"rows_emitted":2,"bytes_read":100}"#,
            );
            write_batch_frame(&mut stream, &make_batch(&[3]));
            write_control_frame(&mut stream, CONCLUDE_SIGNAL, r#"{"outcome":"succeeded"}"#);
        });

        let mut stream = accept_test(&listener);
        let cancel = CancellationToken::new();
        let mut rows = 0usize;
        let conclude = read_guest_frames(
            &mut stream,
            JobId::new(1),
            Duration::from_secs(5),
            &cancel,
            &mut |batch| {
                rows += batch.num_rows();
                Ok(())
            },
        )
        .unwrap();

        assert!(conclude.succeeded());
        assert_eq!(rows, 3);
        writer.join().unwrap();
    }

    #[test]
    fn test_guest_failure_conclude_maps_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (listener, endpoint) = bind_test_listener(dir.path());

        let writer = std::thread::spawn(move || {
            let mut stream = ipc::connect(&endpoint).unwrap();
            write_control_frame(
                &mut stream,
                CONCLUDE_SIGNAL,
                r#"{"outcome":"failed","error_kind":"parser_error","message":"boom"}"#,
            );
        });

        let mut stream = accept_test(&listener);
        let cancel = CancellationToken::new();
        let conclude = read_guest_frames(
            &mut stream,
            JobId::new(1),
            Duration::from_secs(5),
            &cancel,
            &mut |_| Ok(()),
        )
        .unwrap();
        assert!(!conclude.succeeded());
        assert_eq!(conclude.failure_kind(), ErrorKind::ParserError);
        assert_eq!(conclude.message.as_deref(), Some("boom"));
        writer.join().unwrap();
    }

    #[test]
    fn test_eof_without_conclude_is_guest_crashed() {
        let dir = tempfile::tempdir().unwrap();
        let (listener, endpoint) = bind_test_listener(dir.path());

        let writer = std::thread::spawn(move || {
            let mut stream = ipc::connect(&endpoint).unwrap();
            write_batch_frame(&mut stream, &make_batch(&[1]));
            // Drop without conclude: simulated crash.
        });

        let mut stream = accept_test(&listener);
        let cancel = CancellationToken::new();
        let err = read_guest_frames(
            &mut stream,
            JobId::new(1),
            Duration::from_secs(5),
            &cancel,
            &mut |_| Ok(()),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::GuestCrashed);
        writer.join().unwrap();
    }

    #[test]
    fn test_idle_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (listener, endpoint) = bind_test_listener(dir.path());

        let writer = std::thread::spawn(move || {
            let mut stream = ipc::connect(&endpoint).unwrap();
            std::thread::sleep(Duration::from_millis(1500));
            write_control_frame(&mut stream, CONCLUDE_SIGNAL, r#"{"outcome":"succeeded"}"#);
        });

        let mut stream = accept_test(&listener);
        let cancel = CancellationToken::new();
        let err = read_guest_frames(
            &mut stream,
            JobId::new(1),
            Duration::from_millis(300),
            &cancel,
            &mut |_| Ok(()),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::GuestIdleTimeout);
        writer.join().unwrap();
    }

    #[test]
    fn test_cancellation_interrupts_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (listener, endpoint) = bind_test_listener(dir.path());

        let writer = std::thread::spawn(move || {
            let _stream = ipc::connect(&endpoint).unwrap();
            std::thread::sleep(Duration::from_millis(800));
        });

        let mut stream = accept_test(&listener);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = read_guest_frames(
            &mut stream,
            JobId::new(1),
            Duration::from_secs(5),
            &cancel,
            &mut |_| Ok(()),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        writer.join().unwrap();
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (listener, endpoint) = bind_test_listener(dir.path());

        let writer = std::thread::spawn(move || {
            let mut stream = ipc::connect(&endpoint).unwrap();
            let _ = stream.write_all(&(MAX_BATCH_SIZE + 1).to_be_bytes());
        });

        let mut stream = accept_test(&listener);
        let cancel = CancellationToken::new();
        let err = read_guest_frames(
            &mut stream,
            JobId::new(1),
            Duration::from_secs(5),
            &cancel,
            &mut |_| Ok(()),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::GuestCrashed);
        writer.join().unwrap();
    }

    #[test]
    fn test_signal_values_distinct() {
        assert_ne!(CONCLUDE_SIGNAL, PROGRESS_SIGNAL);
        assert!(CONCLUDE_SIGNAL > MAX_BATCH_SIZE);
        assert!(PROGRESS_SIGNAL > MAX_BATCH_SIZE);
    }
}
