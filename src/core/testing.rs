//! In-memory task used by the core's unit tests.
use std::{
    io::{self, Cursor},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use crate::ports::task::{BodyStream, ProxyInfo, RequestMetadata, Task};

#[derive(Default)]
struct Recorded {
    status: Option<(u16, String)>,
    headers: Vec<String>,
    resets: usize,
    committed: bool,
    writes: Vec<Vec<u8>>,
}

/// Records everything the bridge does to it. The first write commits.
#[derive(Default)]
pub struct RecordingTask {
    metadata: RequestMetadata,
    body: Mutex<Option<Vec<u8>>>,
    proxy: Option<ProxyInfo>,
    fail_writes: AtomicBool,
    recorded: Mutex<Recorded>,
}

impl RecordingTask {
    pub fn with_metadata<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            metadata: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn body(self, body: &[u8]) -> Self {
        *self.body.lock() = Some(body.to_vec());
        self
    }

    pub fn proxy(mut self, scheme: &str, host: &str) -> Self {
        self.proxy = Some(ProxyInfo {
            scheme: scheme.to_string(),
            host: host.to_string(),
        });
        self
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn write_chunk(&self, chunk: &[u8]) {
        self.write(chunk).unwrap();
    }

    pub fn status(&self) -> Option<(u16, String)> {
        self.recorded.lock().status.clone()
    }

    pub fn headers(&self) -> Vec<String> {
        self.recorded.lock().headers.clone()
    }

    pub fn resets(&self) -> usize {
        self.recorded.lock().resets
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.recorded.lock().writes.clone()
    }
}

impl Task for RecordingTask {
    fn request_metadata(&self) -> RequestMetadata {
        self.metadata.clone()
    }

    fn body_stream(&self) -> BodyStream {
        Box::new(Cursor::new(self.body.lock().take().unwrap_or_default()))
    }

    fn proxy_info(&self) -> Option<ProxyInfo> {
        self.proxy.clone()
    }

    fn set_response_status(&self, code: u16, reason: &str) {
        self.recorded.lock().status = Some((code, reason.to_string()));
    }

    fn append_response_headers(&self, headers: Vec<String>) {
        self.recorded.lock().headers.extend(headers);
    }

    fn reset_response_headers(&self) {
        let mut recorded = self.recorded.lock();
        recorded.headers.clear();
        recorded.resets += 1;
    }

    fn header_committed(&self) -> bool {
        self.recorded.lock().committed
    }

    fn write(&self, chunk: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"));
        }
        let mut recorded = self.recorded.lock();
        recorded.committed = true;
        recorded.writes.push(chunk.to_vec());
        Ok(())
    }
}
