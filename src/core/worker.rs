//! Session on a dedicated thread
//!
//! The session itself is single-threaded. `SessionWorker` moves it onto its
//! own thread and serializes every request through a channel, so other
//! threads can share the reader without sharing the session.

use crate::core::classifier::WritabilityVerdict;
use crate::core::codec::StringInfo;
use crate::core::error::{CardError, Result};
use crate::core::planner::SpaceReport;
use crate::core::session::{Session, SessionState};
use crate::core::transport::Transport;
use crossbeam::channel::{bounded, unbounded, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Job<T> = Box<dyn FnOnce(&mut Session<T>) + Send>;

/// Handle to a session running on its own thread
pub struct SessionWorker<T: Transport + Send + 'static> {
    jobs: Option<Sender<Job<T>>>,
    thread: Option<JoinHandle<Session<T>>>,
}

impl<T: Transport + Send + 'static> SessionWorker<T> {
    /// Move `session` onto a new named thread
    pub fn spawn(mut session: Session<T>) -> Result<Self> {
        let (tx, rx) = unbounded::<Job<T>>();

        let thread = thread::Builder::new()
            .name("cardstore-session".to_string())
            .spawn(move || {
                debug!("Session worker started");
                for job in rx {
                    job(&mut session);
                }
                debug!("Session worker stopped");
                session
            })?;

        Ok(SessionWorker {
            jobs: Some(tx),
            thread: Some(thread),
        })
    }

    /// Run `f` on the worker thread and wait for its result
    pub fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Session<T>) -> R + Send + 'static,
    {
        let jobs = self.jobs.as_ref().ok_or_else(stopped)?;
        let (reply_tx, reply_rx) = bounded(1);

        let job: Job<T> = Box::new(move |session| {
            let _ = reply_tx.send(f(session));
        });
        jobs.send(job).map_err(|_| stopped())?;
        reply_rx.recv().map_err(|_| stopped())
    }

    /// See [`Session::write_string`]
    pub fn write_string(&self, start_block: u32, text: impl Into<String>) -> Result<Vec<u32>> {
        let text = text.into();
        self.call(move |s| s.write_string(start_block, &text))?
    }

    /// See [`Session::read_string`]
    pub fn read_string(&self, start_block: u32) -> Result<String> {
        self.call(move |s| s.read_string(start_block))?
    }

    /// See [`Session::get_string_info`]
    pub fn get_string_info(&self, start_block: u32) -> Result<StringInfo> {
        self.call(move |s| s.get_string_info(start_block))?
    }

    /// See [`Session::get_available_space`]
    pub fn get_available_space(&self, start_block: u32) -> Result<SpaceReport> {
        self.call(move |s| s.get_available_space(start_block))?
    }

    /// See [`Session::check_writability`]
    pub fn check_writability(&self) -> Result<WritabilityVerdict> {
        self.call(|s| s.check_writability())?
    }

    /// See [`Session::erase_string`]
    pub fn erase_string(&self, start_block: u32) -> Result<Vec<u32>> {
        self.call(move |s| s.erase_string(start_block))?
    }

    /// See [`Session::refresh_cache`]
    pub fn refresh_cache(&self) -> Result<()> {
        self.call(|s| s.refresh_cache())
    }

    /// See [`Session::recover_connection`]
    pub fn recover_connection(&self) -> Result<bool> {
        self.call(|s| s.recover_connection())
    }

    /// Current session state
    pub fn state(&self) -> Result<SessionState> {
        self.call(|s| s.state())
    }

    /// Stop the thread and hand the session back
    pub fn shutdown(mut self) -> Result<Session<T>> {
        self.jobs.take();
        let thread = self.thread.take().ok_or_else(stopped)?;
        thread
            .join()
            .map_err(|_| CardError::Transport("session worker panicked".to_string()))
    }
}

impl<T: Transport + Send + 'static> Drop for SessionWorker<T> {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Session worker panicked during shutdown");
            }
        }
    }
}

fn stopped() -> CardError {
    CardError::Transport("session worker is not running".to_string())
}
