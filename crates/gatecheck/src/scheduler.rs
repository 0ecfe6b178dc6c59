//! Deferred work for the host's main update path.
//!
//! Worker tasks never touch session state. They post their results through a
//! [`MainQueueHandle`], and the main path drains the queue on its next update.

use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, VecDeque},
    time::Duration,
};

use gatecheck_config::LogType;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tracing::trace;

struct Deferred<E> {
    due: Instant,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Deferred<E> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<E> Eq for Deferred<E> {}

impl<E> PartialOrd for Deferred<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Deferred<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Cloneable sender for worker tasks.
#[derive(Debug)]
pub struct MainQueueHandle<E> {
    sender: mpsc::UnboundedSender<E>,
}

impl<E> Clone for MainQueueHandle<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E> MainQueueHandle<E> {
    /// Runs `event` on the next update. Returns `false` once the queue is gone.
    pub fn post(&self, event: E) -> bool {
        self.sender.send(event).is_ok()
    }
}

pub struct MainQueue<E> {
    ready: VecDeque<E>,
    deferred: BinaryHeap<Reverse<Deferred<E>>>,
    seq: u64,
    sender: mpsc::UnboundedSender<E>,
    receiver: mpsc::UnboundedReceiver<E>,
}

impl<E> Default for MainQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> MainQueue<E> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            ready: VecDeque::new(),
            deferred: BinaryHeap::new(),
            seq: 0,
            sender,
            receiver,
        }
    }

    pub fn handle(&self) -> MainQueueHandle<E> {
        MainQueueHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn run_on_next_update(&mut self, event: E) {
        self.ready.push_back(event);
    }

    pub fn run_after(&mut self, delay: Duration, event: E) {
        self.seq += 1;
        self.deferred.push(Reverse(Deferred {
            due: Instant::now() + delay,
            seq: self.seq,
            event,
        }));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deferred.peek().map(|Reverse(deferred)| deferred.due)
    }

    /// Events waiting in any form, including ones not yet due.
    pub fn pending(&self) -> usize {
        self.ready.len() + self.deferred.len() + self.receiver.len()
    }

    /// Everything runnable now: posted results, next-update work, then due timers.
    pub fn drain_due(&mut self) -> Vec<E> {
        while let Ok(event) = self.receiver.try_recv() {
            self.ready.push_back(event);
        }

        let now = Instant::now();
        while self
            .deferred
            .peek()
            .is_some_and(|Reverse(deferred)| deferred.due <= now)
        {
            if let Some(Reverse(deferred)) = self.deferred.pop() {
                self.ready.push_back(deferred.event);
            }
        }

        let events: Vec<E> = self.ready.drain(..).collect();
        if !events.is_empty() {
            trace!(
                log_type = LogType::Scheduler.as_str(),
                "Draining {} main-path event(s)", events.len()
            );
        }
        events
    }

    /// Waits until something is runnable: a posted result or the next timer.
    pub async fn wait(&mut self) {
        if !self.ready.is_empty()
            || self.next_deadline().is_some_and(|due| due <= Instant::now())
        {
            return;
        }

        let deadline = self.next_deadline();
        tokio::select! {
            event = self.receiver.recv() => {
                if let Some(event) = event {
                    self.ready.push_back(event);
                }
            }
            _ = async {
                match deadline {
                    Some(due) => sleep_until(due).await,
                    None => std::future::pending().await,
                }
            } => {}
        }
    }
}
