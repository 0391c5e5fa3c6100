//! # Frame Timer
//!
//! Background thread that ticks a shared player once per frame interval.
//! Deadlines advance by the nominal interval, so a slow tick is caught up on
//! the next one instead of accumulating drift.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::player::{PlayerError, PlayerState, SmushPlayer};

pub struct FrameTimer {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FrameTimer {
    /// Start ticking `player` at its movie's frame interval.
    ///
    /// The thread exits on its own once the player is finished or stopped.
    pub fn start(player: Arc<Mutex<SmushPlayer>>) -> Result<Self, PlayerError> {
        let interval = player.lock().frame_interval().ok_or(PlayerError::NotOpen)?;
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("smush-timer".to_string())
            .spawn(move || run(player, interval, flag))
            .map_err(PlayerError::Timer)?;

        tracing::debug!("Frame timer started at {:?}/frame", interval);
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Block until the thread exits by itself.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Stop ticking. Does not stop the player.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for FrameTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(player: Arc<Mutex<SmushPlayer>>, interval: Duration, running: Arc<AtomicBool>) {
    let mut deadline = Instant::now();
    while running.load(Ordering::Acquire) {
        {
            let mut player = player.lock();
            match player.state() {
                PlayerState::Finished | PlayerState::Stopped => break,
                _ => {}
            }
            if let Err(e) = player.tick() {
                tracing::warn!("Frame timer tick failed: {}", e);
            }
        }

        deadline += interval;
        let now = Instant::now();
        if deadline < now {
            // Too far behind; restart the schedule from here
            deadline = now;
        }
        while running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
    }
    running.store(false, Ordering::Release);
    tracing::debug!("Frame timer exited");
}
