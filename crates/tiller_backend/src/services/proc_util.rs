use std::io::{BufReader, Read};
use std::process::Child;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Watches a cancel flag and kills the child process when it flips. Call
/// `finish` once the process has exited on its own so the watcher stops.
pub(super) struct CancelKiller {
    finished: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CancelKiller {
    pub(super) fn spawn(child: Arc<std::sync::Mutex<Child>>, cancel: Arc<AtomicBool>) -> Self {
        let finished = Arc::new(AtomicBool::new(false));
        let watcher_finished = finished.clone();
        let handle = thread::spawn(move || {
            while !watcher_finished.load(Ordering::SeqCst) && !cancel.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(25));
            }
            if cancel.load(Ordering::SeqCst)
                && let Ok(mut child) = child.lock()
            {
                let _ = child.kill();
            }
        });
        Self {
            finished,
            handle: Some(handle),
        }
    }

    pub(super) fn finish(mut self) {
        self.finished.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Drain a pipe to a string on its own thread, so stderr cannot fill up and
/// block the child while stdout is being streamed.
pub(super) fn spawn_read_to_string<R: Read + Send + 'static>(input: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(input);
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).to_string()
    })
}
