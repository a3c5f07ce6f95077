//! Scripted frame source for tests and replays.
//!
//! Plays back an explicit list of steps: frames, read failures, and an optional
//! explicit end. Once the script is exhausted the stream ends. A [`ScriptCounters`] taken
//! before the source is moved onto a worker reports what the worker did with it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

pub enum ScriptStep {
    Frame(Frame),
    /// One failed read with this message.
    Fail(String),
    /// End of stream, even if steps remain.
    End,
}

impl std::fmt::Debug for ScriptStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame(frame) => write!(f, "Frame(pts={})", frame.pts),
            Self::Fail(message) => write!(f, "Fail({message})"),
            Self::End => f.write_str("End"),
        }
    }
}

#[derive(Default)]
struct CounterState {
    connects: AtomicU64,
    reconnects: AtomicU64,
    released: AtomicBool,
    frames_read: AtomicU64,
}

/// Shared view of a [`ScriptedSource`]'s lifecycle.
#[derive(Clone, Default)]
pub struct ScriptCounters {
    state: Arc<CounterState>,
}

impl ScriptCounters {
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> u64 {
        self.state.reconnects.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.state.released.load(Ordering::SeqCst)
    }

    pub fn frames_read(&self) -> u64 {
        self.state.frames_read.load(Ordering::SeqCst)
    }
}

pub struct ScriptedSource {
    label: String,
    steps: VecDeque<ScriptStep>,
    connected: bool,
    read_failures: u64,
    counters: ScriptCounters,
}

impl ScriptedSource {
    pub fn new(label: impl Into<String>, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            label: label.into(),
            steps: steps.into_iter().collect(),
            connected: false,
            read_failures: 0,
            counters: ScriptCounters::default(),
        }
    }

    pub fn push(&mut self, step: ScriptStep) {
        self.steps.push_back(step);
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }

    pub fn counters(&self) -> ScriptCounters {
        self.counters.clone()
    }
}

impl FrameSource for ScriptedSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        self.counters.state.released.store(false, Ordering::SeqCst);
        self.counters.state.connects.fetch_add(1, Ordering::SeqCst);
        log::debug!("ScriptedSource: connected to {}", self.label);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("scripted source {} is not connected", self.label));
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Frame(frame)) => {
                self.counters.state.frames_read.fetch_add(1, Ordering::SeqCst);
                Ok(Some(frame))
            }
            Some(ScriptStep::Fail(message)) => {
                self.read_failures += 1;
                Err(anyhow!(message))
            }
            Some(ScriptStep::End) | None => Ok(None),
        }
    }

    fn seek(&mut self, _index: u64) -> Result<()> {
        Err(anyhow!("scripted source {} does not support seeking", self.label))
    }

    fn reconnect(&mut self) -> Result<()> {
        self.counters.state.reconnects.fetch_add(1, Ordering::SeqCst);
        self.release();
        self.connect()
    }

    fn release(&mut self) {
        self.connected = false;
        self.counters.state.released.store(true, Ordering::SeqCst);
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.counters.frames_read(),
            read_failures: self.read_failures,
            reconnects: self.counters.reconnects(),
            url: self.label.clone(),
        }
    }
}
