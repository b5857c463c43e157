//! Converter (ffmpeg-shaped) process invocation: file, tee, and ephemeral
//! execution shapes.
//!
//! Grounded on `tools/transcoder.rs::transcode_file` for argument shape and
//! timeout handling, adapted from `std::process::Command` to
//! `tokio::process::Command` and split into three shapes the facade needs:
//! write-to-cache-file, write-to-cache-file-while-streaming ("tee"), and
//! write-to-a-disposable-path ("ephemeral").

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// Channel capacity for the live byte stream fanned out during a tee run.
/// Bounded so a slow HTTP client applies backpressure to the converter
/// without ever blocking the cache-file write it runs alongside.
const LIVE_CHANNEL_CAPACITY: usize = 64;
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Owns every argument the converter invocation needs, so a tee run can
/// move it wholesale into a detached `tokio::spawn` task.
pub struct ConverterJob {
    pub converter_path: String,
    pub source: PathBuf,
    pub codec: String,
    pub bitrate_kbps: u32,
    pub timeout: Duration,
}

fn file_args(job: &ConverterJob, output: &Path) -> Vec<std::ffi::OsString> {
    vec![
        "-y".into(),
        "-i".into(),
        job.source.as_os_str().to_os_string(),
        "-vn".into(),
        "-c:a".into(),
        job.codec.as_str().into(),
        "-b:a".into(),
        format!("{}k", job.bitrate_kbps).into(),
        "-map_metadata".into(),
        "-1".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.as_os_str().to_os_string(),
    ]
}

fn tee_args(job: &ConverterJob) -> Vec<std::ffi::OsString> {
    vec![
        "-y".into(),
        "-i".into(),
        job.source.as_os_str().to_os_string(),
        "-vn".into(),
        "-c:a".into(),
        job.codec.as_str().into(),
        "-b:a".into(),
        format!("{}k", job.bitrate_kbps).into(),
        "-map_metadata".into(),
        "-1".into(),
        "-movflags".into(),
        "frag_keyframe+empty_moov".into(),
        "-f".into(),
        "mp4".into(),
        "pipe:1".into(),
    ]
}

/// Runs the converter writing straight to a final cache path. Writes to a
/// sibling `.tmp` file first and renames atomically so a reader can never
/// observe a partially-written cache entry.
pub async fn run_to_file(job: ConverterJob, final_path: &Path) -> Result<u64, String> {
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create cache directory: {e}"))?;
    }

    let tmp_path = final_path.with_extension(format!(
        "{}.tmp",
        final_path.extension().and_then(|e| e.to_str()).unwrap_or("out")
    ));

    let args = file_args(&job, &tmp_path);
    let spawn = Command::new(job.converter_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = spawn.map_err(|e| format!("failed to spawn converter: {e}"))?;
    let stderr = child.stderr.take();
    // Drain stderr on its own task as soon as the child is spawned. ffmpeg
    // writes continuous progress stats there even without a tty; if we only
    // read it after `wait()` returns, a converter producing more than the OS
    // pipe buffer blocks on that write and never exits, so `wait()` hangs
    // until the timeout kills it and we discard a perfectly good transcode.
    let stderr_task = tokio::spawn(read_stderr_tail(stderr));

    let wait = child.wait();
    let status = match tokio::time::timeout(job.timeout, wait).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            stderr_task.abort();
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(format!("converter process error: {e}"));
        }
        Err(_) => {
            let _ = child.start_kill();
            stderr_task.abort();
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err("converter timed out".to_string());
        }
    };

    if !status.success() {
        let message = stderr_task.await.unwrap_or_default();
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(format!("converter exited with {status}: {message}"));
    }
    stderr_task.abort();

    let metadata = match tokio::fs::metadata(&tmp_path).await {
        Ok(m) if m.len() > 0 => m,
        _ => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err("converter produced an empty output file".to_string());
        }
    };

    tokio::fs::rename(&tmp_path, final_path)
        .await
        .map_err(|e| format!("failed to finalize cache file: {e}"))?;

    Ok(metadata.len())
}

/// Ephemeral variant of [`run_to_file`]: same converter invocation, written
/// directly to a disposable path with no rename (nothing reads it concurrently).
pub async fn run_ephemeral(job: ConverterJob, output_path: &Path) -> Result<u64, String> {
    run_to_file(job, output_path).await
}

pub struct TeeHandle {
    pub bytes: mpsc::Receiver<Bytes>,
    pub completion: oneshot::Receiver<Result<(PathBuf, u64), String>>,
}

/// Spawns the converter once, fanning its stdout to a live bounded channel
/// while simultaneously writing it to a cache-bound tempfile. The tempfile
/// write always runs to completion even if the live consumer disconnects
/// early, so a half-watched stream still warms the cache.
pub fn spawn_tee(job: ConverterJob, final_path: PathBuf) -> TeeHandle {
    let (byte_tx, byte_rx) = mpsc::channel(LIVE_CHANNEL_CAPACITY);
    let (completion_tx, completion_rx) = oneshot::channel();

    tokio::spawn(async move {
        let result = run_tee_inner(job, &final_path, byte_tx).await;
        let _ = completion_tx.send(result);
    });

    TeeHandle {
        bytes: byte_rx,
        completion: completion_rx,
    }
}

async fn run_tee_inner(
    job: ConverterJob,
    final_path: &Path,
    byte_tx: mpsc::Sender<Bytes>,
) -> Result<(PathBuf, u64), String> {
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create cache directory: {e}"))?;
    }

    let tmp_path = final_path.with_extension(format!(
        "{}.tmp",
        final_path.extension().and_then(|e| e.to_str()).unwrap_or("out")
    ));

    let args = tee_args(&job);
    let mut child = Command::new(job.converter_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn converter: {e}"))?;

    let mut stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(read_stderr_tail(stderr));

    let tmp_file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| format!("failed to create cache tempfile: {e}"))?;

    // The cache-file write runs on its own task fed by its own channel, so a
    // slow live consumer (bounded by `byte_tx`'s capacity) can never stall
    // the disk write, and a slow disk can never stall bytes already queued
    // for the live client.
    let (cache_tx, cache_rx) = mpsc::channel::<Bytes>(LIVE_CHANNEL_CAPACITY);
    let cache_write_task = tokio::spawn(write_cache_file(tmp_file, cache_rx));

    let copy_loop = async {
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            let n = stdout
                .read(&mut buf)
                .await
                .map_err(|e| format!("error reading converter stdout: {e}"))?;
            if n == 0 {
                break;
            }
            let chunk = Bytes::copy_from_slice(&buf[..n]);
            // Fan out to both sinks concurrently: a full live channel must not
            // delay handing this chunk to the cache writer, and vice versa.
            let (_live, cache) = tokio::join!(byte_tx.send(chunk.clone()), cache_tx.send(chunk));
            if cache.is_err() {
                // Cache writer already failed and dropped its receiver; stop
                // feeding it but keep draining stdout so the live side (and
                // the child's own progress) isn't held up by our own loop.
                break;
            }
        }
        Ok::<(), String>(())
    };

    let wait = child.wait();
    let (copy_result, status) = match tokio::time::timeout(job.timeout, async { (copy_loop.await, wait.await) }).await
    {
        Ok((copy_result, Ok(status))) => (copy_result, status),
        Ok((_, Err(e))) => {
            drop(cache_tx);
            stderr_task.abort();
            let _ = cache_write_task.await;
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(format!("converter process error: {e}"));
        }
        Err(_) => {
            let _ = child.start_kill();
            drop(cache_tx);
            stderr_task.abort();
            let _ = cache_write_task.await;
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err("converter timed out".to_string());
        }
    };

    drop(cache_tx);
    let cache_result = cache_write_task
        .await
        .unwrap_or_else(|e| Err(format!("cache writer task panicked: {e}")));

    copy_result?;

    if !status.success() {
        let message = stderr_task.await.unwrap_or_default();
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(format!("converter exited with {status}: {message}"));
    }

    let size_bytes = cache_result?;
    if size_bytes == 0 {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err("converter produced an empty output file".to_string());
    }
    stderr_task.abort();

    tokio::fs::rename(&tmp_path, final_path)
        .await
        .map_err(|e| format!("failed to finalize cache file: {e}"))?;

    Ok((final_path.to_path_buf(), size_bytes))
}

/// Writes every chunk received over `rx` to `file`, returning the total
/// bytes written. Runs on its own task so its pace never gates the reader
/// loop feeding the live channel.
async fn write_cache_file(mut file: tokio::fs::File, mut rx: mpsc::Receiver<Bytes>) -> Result<u64, String> {
    use tokio::io::AsyncWriteExt;
    let mut total = 0u64;
    while let Some(chunk) = rx.recv().await {
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("error writing cache tempfile: {e}"))?;
        total += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| format!("error flushing cache tempfile: {e}"))?;
    Ok(total)
}

async fn read_stderr_tail(stderr: Option<tokio::process::ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = stderr.read_to_end(&mut buf).await;
    let text = String::from_utf8_lossy(&buf);
    text.lines().rev().take(3).collect::<Vec<_>>().join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_converter_script(body: &str) -> tempfile::TempPath {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#!/bin/bash\n{body}").unwrap();
        let path = file.into_temp_path();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn run_to_file_succeeds_and_renames_tmp_into_place() {
        let script = fake_converter_script("echo fake-transcode > \"${@: -1}\"");
        let source = tempfile::NamedTempFile::new().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let final_path = out_dir.path().join("song.m4a");

        let job = ConverterJob {
            converter_path: script.to_str().unwrap().to_string(),
            source: source.path().to_path_buf(),
            codec: "aac".to_string(),
            bitrate_kbps: 128,
            timeout: Duration::from_secs(5),
        };

        let size = run_to_file(job, &final_path).await.unwrap();
        assert!(size > 0);
        assert!(final_path.exists());
        assert!(!final_path.with_extension("m4a.tmp").exists());
    }

    #[tokio::test]
    async fn run_to_file_reports_nonzero_exit() {
        let script = fake_converter_script("exit 1");
        let source = tempfile::NamedTempFile::new().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let final_path = out_dir.path().join("song.m4a");

        let job = ConverterJob {
            converter_path: script.to_str().unwrap().to_string(),
            source: source.path().to_path_buf(),
            codec: "aac".to_string(),
            bitrate_kbps: 128,
            timeout: Duration::from_secs(5),
        };

        let err = run_to_file(job, &final_path).await.unwrap_err();
        assert!(err.contains("exited"));
        assert!(!final_path.exists());
    }

    #[tokio::test]
    async fn run_to_file_times_out_on_a_hanging_converter() {
        let script = fake_converter_script("sleep 5");
        let source = tempfile::NamedTempFile::new().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let final_path = out_dir.path().join("song.m4a");

        let job = ConverterJob {
            converter_path: script.to_str().unwrap().to_string(),
            source: source.path().to_path_buf(),
            codec: "aac".to_string(),
            bitrate_kbps: 128,
            timeout: Duration::from_millis(50),
        };

        let err = run_to_file(job, &final_path).await.unwrap_err();
        assert!(err.contains("timed out"));
        assert!(!final_path.exists());
    }

    #[tokio::test]
    async fn run_to_file_drains_stderr_larger_than_the_pipe_buffer() {
        // A converter that floods stderr before exiting must not deadlock:
        // if stderr is only drained after `wait()`, this write blocks once it
        // fills the OS pipe buffer and the process never exits.
        let script = fake_converter_script("yes line | head -c 200000 1>&2; echo fake-transcode > \"${@: -1}\"");
        let source = tempfile::NamedTempFile::new().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let final_path = out_dir.path().join("song.m4a");

        let job = ConverterJob {
            converter_path: script.to_str().unwrap().to_string(),
            source: source.path().to_path_buf(),
            codec: "aac".to_string(),
            bitrate_kbps: 128,
            timeout: Duration::from_secs(5),
        };

        let size = run_to_file(job, &final_path).await.unwrap();
        assert!(size > 0);
        assert!(final_path.exists());
    }
}
