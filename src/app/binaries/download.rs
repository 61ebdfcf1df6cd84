use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::LOCATION;
use reqwest::Url;
use tracing::{debug, info};

use crate::app::error::AppError;

pub const MAX_REDIRECTS: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const SAMPLE_INTERVAL: Duration = Duration::from_millis(300);
const READ_CHUNK: usize = 64 * 1024;
const USER_AGENT: &str = concat!("droidkit/", env!("CARGO_PKG_VERSION"));

/// One progress observation during a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub downloaded_bytes: u64,
    /// 0 when the server did not declare a Content-Length.
    pub total_bytes: u64,
    pub bytes_per_sec: f64,
}

enum TransferEvent {
    Opened { total_bytes: u64 },
    Body(Vec<u8>),
    Finished,
    Failed(AppError),
}

pub struct DownloadEngine {
    client: Client,
    idle_timeout: Duration,
}

impl DownloadEngine {
    pub fn new(trace_id: &str) -> Result<Self, AppError> {
        Self::with_timeout(DEFAULT_TIMEOUT, trace_id)
    }

    /// `timeout` is an idle limit: connecting, the response headers, and each
    /// body chunk must arrive within it. A healthy long transfer is never cut
    /// short, which rules out the client-level request timeout; idleness is
    /// enforced in the receive loop instead.
    pub fn with_timeout(timeout: Duration, trace_id: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .timeout(None::<Duration>)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| {
                AppError::system(format!("Failed to build HTTP client: {err}"), trace_id)
            })?;
        Ok(Self {
            client,
            idle_timeout: timeout,
        })
    }

    /// GET `url` and stream the body to `dest`, following redirects manually
    /// and reporting progress at most every ~300ms plus a final sample. Any
    /// failure after `dest` was created removes the partial file.
    pub fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut dyn FnMut(ProgressSample),
        trace_id: &str,
    ) -> Result<(), AppError> {
        // Network I/O runs on its own thread so a read blocked on a stalled
        // server cannot hold up the idle-timeout check below.
        let (sender, receiver) = mpsc::channel();
        let client = self.client.clone();
        let request_url = url.to_string();
        let worker_trace = trace_id.to_string();
        std::thread::spawn(move || {
            stream_response(&client, &request_url, &sender, &worker_trace);
        });

        let total_bytes = match self.next_event(&receiver, trace_id)? {
            TransferEvent::Opened { total_bytes } => total_bytes,
            TransferEvent::Failed(err) => return Err(err),
            TransferEvent::Body(_) | TransferEvent::Finished => {
                return Err(AppError::system(
                    "Download worker sent body before headers",
                    trace_id,
                ));
            }
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::system(format!("Failed to create download directory: {err}"), trace_id)
            })?;
        }
        let file = File::create(dest).map_err(|err| {
            AppError::system(format!("Failed to create {}: {err}", dest.display()), trace_id)
        })?;

        let result = self.receive_to_file(&receiver, file, total_bytes, on_progress, trace_id);
        if let Err(err) = result {
            // No partial artifacts: a retry must start from a clean slate.
            let _ = fs::remove_file(dest);
            return Err(err);
        }
        info!(trace_id = %trace_id, url = %url, dest = %dest.display(), "download complete");
        Ok(())
    }

    fn next_event(
        &self,
        receiver: &Receiver<TransferEvent>,
        trace_id: &str,
    ) -> Result<TransferEvent, AppError> {
        match receiver.recv_timeout(self.idle_timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Err(AppError::timeout(
                format!("Download timed out: no data within {:?}", self.idle_timeout),
                trace_id,
            )),
            Err(RecvTimeoutError::Disconnected) => Err(AppError::system(
                "Download worker exited unexpectedly",
                trace_id,
            )),
        }
    }

    fn receive_to_file(
        &self,
        receiver: &Receiver<TransferEvent>,
        mut file: File,
        total_bytes: u64,
        on_progress: &mut dyn FnMut(ProgressSample),
        trace_id: &str,
    ) -> Result<(), AppError> {
        let mut downloaded = 0u64;
        let mut window_start = Instant::now();
        let mut window_bytes = 0u64;

        loop {
            match self.next_event(receiver, trace_id)? {
                TransferEvent::Body(chunk) => {
                    file.write_all(&chunk).map_err(|err| {
                        AppError::system(format!("Failed to write download: {err}"), trace_id)
                    })?;
                    downloaded += chunk.len() as u64;
                    window_bytes += chunk.len() as u64;

                    let elapsed = window_start.elapsed();
                    if elapsed >= SAMPLE_INTERVAL {
                        on_progress(ProgressSample {
                            downloaded_bytes: downloaded,
                            total_bytes,
                            bytes_per_sec: window_bytes as f64 / elapsed.as_secs_f64(),
                        });
                        window_start = Instant::now();
                        window_bytes = 0;
                    }
                }
                TransferEvent::Finished => break,
                TransferEvent::Failed(err) => return Err(err),
                TransferEvent::Opened { .. } => {
                    return Err(AppError::system("Download worker repeated headers", trace_id));
                }
            }
        }

        file.flush()
            .map_err(|err| AppError::system(format!("Failed to flush download: {err}"), trace_id))?;

        // Terminal sample so consumers always observe the final byte count.
        let elapsed = window_start.elapsed().as_secs_f64();
        on_progress(ProgressSample {
            downloaded_bytes: downloaded,
            total_bytes,
            bytes_per_sec: if elapsed > 0.0 {
                window_bytes as f64 / elapsed
            } else {
                0.0
            },
        });
        Ok(())
    }
}

fn stream_response(client: &Client, url: &str, sender: &Sender<TransferEvent>, trace_id: &str) {
    let mut response = match request_following_redirects(client, url, trace_id) {
        Ok(response) => response,
        Err(err) => {
            let _ = sender.send(TransferEvent::Failed(err));
            return;
        }
    };
    let total_bytes = response.content_length().unwrap_or(0);
    if sender.send(TransferEvent::Opened { total_bytes }).is_err() {
        return;
    }

    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match response.read(&mut chunk) {
            Ok(0) => {
                let _ = sender.send(TransferEvent::Finished);
                return;
            }
            Ok(count) => {
                // A send error means the receiving side already gave up.
                if sender.send(TransferEvent::Body(chunk[..count].to_vec())).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = sender.send(TransferEvent::Failed(AppError::dependency(
                    format!("Download interrupted: {err}"),
                    trace_id,
                )));
                return;
            }
        }
    }
}

fn request_following_redirects(
    client: &Client,
    url: &str,
    trace_id: &str,
) -> Result<reqwest::blocking::Response, AppError> {
    let mut current = Url::parse(url)
        .map_err(|err| AppError::validation(format!("Invalid URL {url}: {err}"), trace_id))?;
    let mut redirects = 0usize;

    loop {
        let response = client.get(current.clone()).send().map_err(|err| {
            if err.is_timeout() {
                AppError::timeout(format!("Download timed out: {err}"), trace_id)
            } else {
                AppError::dependency(format!("Download failed: {err}"), trace_id)
            }
        })?;

        let status = response.status();
        if status.is_redirection() {
            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(AppError::dependency(
                    format!("Too many redirects (more than {MAX_REDIRECTS})"),
                    trace_id,
                ));
            }
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| {
                    AppError::dependency("Redirect without Location header", trace_id)
                })?;
            // Relative Location values resolve against the URL we just hit.
            current = current.join(location).map_err(|err| {
                AppError::dependency(format!("Invalid redirect target {location}: {err}"), trace_id)
            })?;
            debug!(trace_id = %trace_id, url = %current, hop = redirects, "following redirect");
            continue;
        }

        if !status.is_success() {
            return Err(AppError::dependency(
                format!(
                    "Download failed: HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
                trace_id,
            ));
        }

        return Ok(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn read_request(stream: &TcpStream) {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).is_err() || line == "\r\n" || line.is_empty() {
                break;
            }
        }
    }

    fn spawn_server(
        max_conns: usize,
        handler: impl Fn(usize, TcpStream) + Send + Sync + 'static,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        std::thread::spawn(move || {
            for index in 0..max_conns {
                match listener.accept() {
                    Ok((stream, _)) => handler(index, stream),
                    Err(_) => break,
                }
            }
        });
        format!("http://{addr}")
    }

    fn write_ok_response(mut stream: TcpStream, body: &[u8], content_length: bool) {
        read_request(&stream);
        let mut header = String::from("HTTP/1.1 200 OK\r\nConnection: close\r\n");
        if content_length {
            header.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        header.push_str("\r\n");
        let _ = stream.write_all(header.as_bytes());
        let _ = stream.write_all(body);
    }

    fn engine() -> DownloadEngine {
        DownloadEngine::with_timeout(Duration::from_secs(5), "test-trace").expect("engine")
    }

    #[test]
    fn downloads_body_to_destination() {
        let url = spawn_server(1, |_, stream| {
            write_ok_response(stream, b"payload-bytes", true);
        });
        let dir = TempDir::new().expect("tmp");
        let dest = dir.path().join("nested/dir/archive.zip");

        let mut samples = Vec::new();
        engine()
            .download(&url, &dest, &mut |sample| samples.push(sample), "test-trace")
            .expect("download");

        assert_eq!(fs::read(&dest).expect("read"), b"payload-bytes");
        let last = samples.last().expect("final sample");
        assert_eq!(last.downloaded_bytes, 13);
        assert_eq!(last.total_bytes, 13);
    }

    #[test]
    fn follows_redirect_then_succeeds() {
        let url = spawn_server(2, |index, mut stream| {
            if index == 0 {
                read_request(&stream);
                let _ = stream.write_all(
                    b"HTTP/1.1 302 Found\r\nLocation: /archive\r\nConnection: close\r\n\r\n",
                );
            } else {
                write_ok_response(stream, b"redirected", true);
            }
        });
        let dir = TempDir::new().expect("tmp");
        let dest = dir.path().join("archive.zip");

        engine()
            .download(&url, &dest, &mut |_| {}, "test-trace")
            .expect("download");
        assert_eq!(fs::read(&dest).expect("read"), b"redirected");
    }

    #[test]
    fn fails_after_redirect_bound_without_partial_file() {
        let url = spawn_server(MAX_REDIRECTS + 2, |_, mut stream| {
            read_request(&stream);
            let _ = stream.write_all(
                b"HTTP/1.1 302 Found\r\nLocation: /loop\r\nConnection: close\r\n\r\n",
            );
        });
        let dir = TempDir::new().expect("tmp");
        let dest = dir.path().join("archive.zip");

        let err = engine()
            .download(&url, &dest, &mut |_| {}, "test-trace")
            .expect_err("expected redirect failure");
        assert!(err.error.contains("Too many redirects"));
        assert!(!dest.exists());
    }

    #[test]
    fn surfaces_http_error_status() {
        let url = spawn_server(1, |_, mut stream| {
            read_request(&stream);
            let _ = stream.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        });
        let dir = TempDir::new().expect("tmp");
        let dest = dir.path().join("archive.zip");

        let err = engine()
            .download(&url, &dest, &mut |_| {}, "test-trace")
            .expect_err("expected 404 failure");
        assert!(err.error.contains("404"), "got: {}", err.error);
        assert!(!dest.exists());
    }

    #[test]
    fn times_out_against_silent_server() {
        let url = spawn_server(1, |_, stream| {
            read_request(&stream);
            // Accept and go silent; the client must give up on its own.
            std::thread::sleep(Duration::from_secs(5));
            drop(stream);
        });
        let dir = TempDir::new().expect("tmp");
        let dest = dir.path().join("archive.zip");

        let engine =
            DownloadEngine::with_timeout(Duration::from_millis(400), "test-trace").expect("engine");
        let started = Instant::now();
        let err = engine
            .download(&url, &dest, &mut |_| {}, "test-trace")
            .expect_err("expected timeout");
        assert_eq!(err.code, "ERR_TIMEOUT");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!dest.exists());
    }

    #[test]
    fn times_out_when_body_stalls_midway() {
        let url = spawn_server(1, |_, mut stream| {
            read_request(&stream);
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Length: 4000\r\nConnection: close\r\n\r\n",
            );
            let _ = stream.write_all(&[5u8; 1000]);
            let _ = stream.flush();
            // Headers and part of the body arrive, then nothing.
            std::thread::sleep(Duration::from_secs(5));
            drop(stream);
        });
        let dir = TempDir::new().expect("tmp");
        let dest = dir.path().join("archive.zip");

        let engine =
            DownloadEngine::with_timeout(Duration::from_millis(400), "test-trace").expect("engine");
        let started = Instant::now();
        let err = engine
            .download(&url, &dest, &mut |_| {}, "test-trace")
            .expect_err("expected mid-body timeout");
        assert_eq!(err.code, "ERR_TIMEOUT");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!dest.exists(), "stalled download left a partial file");
    }

    #[test]
    fn removes_partial_file_when_body_is_truncated() {
        let url = spawn_server(1, |_, mut stream| {
            read_request(&stream);
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Length: 10000\r\nConnection: close\r\n\r\n",
            );
            let _ = stream.write_all(&[0u8; 100]);
            // Drop the connection mid-body.
        });
        let dir = TempDir::new().expect("tmp");
        let dest = dir.path().join("archive.zip");

        let err = engine()
            .download(&url, &dest, &mut |_| {}, "test-trace")
            .expect_err("expected truncated-body failure");
        assert!(!dest.exists(), "partial file left behind: {}", err.error);
    }

    #[test]
    fn progress_is_monotonic_and_reaches_total() {
        let body_chunks = 4usize;
        let chunk_size = 1000usize;
        let total = (body_chunks * chunk_size) as u64;
        let url = spawn_server(1, move |_, mut stream| {
            read_request(&stream);
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(header.as_bytes());
            for _ in 0..body_chunks {
                let _ = stream.write_all(&vec![7u8; chunk_size]);
                let _ = stream.flush();
                std::thread::sleep(Duration::from_millis(350));
            }
        });
        let dir = TempDir::new().expect("tmp");
        let dest = dir.path().join("archive.zip");

        let samples = Arc::new(Mutex::new(Vec::<ProgressSample>::new()));
        let sink = Arc::clone(&samples);
        engine()
            .download(
                &url,
                &dest,
                &mut |sample| sink.lock().unwrap().push(sample),
                "test-trace",
            )
            .expect("download");

        let samples = samples.lock().unwrap();
        assert!(samples.len() >= 2, "expected multiple samples");
        let mut previous = 0u64;
        for sample in samples.iter() {
            assert!(sample.downloaded_bytes >= previous);
            assert_eq!(sample.total_bytes, total);
            previous = sample.downloaded_bytes;
        }
        assert_eq!(samples.last().expect("final").downloaded_bytes, total);
    }

    #[test]
    fn missing_content_length_reports_zero_total() {
        let url = spawn_server(1, |_, stream| {
            write_ok_response(stream, b"abcdef", false);
        });
        let dir = TempDir::new().expect("tmp");
        let dest = dir.path().join("archive.zip");

        let mut totals = Vec::new();
        engine()
            .download(&url, &dest, &mut |sample| totals.push(sample.total_bytes), "test-trace")
            .expect("download");
        assert!(totals.iter().all(|total| *total == 0));
        assert_eq!(fs::read(&dest).expect("read").len(), 6);
    }
}
