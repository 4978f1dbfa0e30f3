// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dependency tokens
//!
//! A [`JobHandle`] stands for "this work, once finished, makes some component
//! data safe to touch". The producer side is a [`JobCompleter`]; dropping it
//! without completing marks the handle abandoned, and joining an abandoned
//! handle reports [`EcsError::JobAbandoned`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::error::{EcsError, Result};

type Continuation = Box<dyn FnOnce(bool) + Send>;

enum JobState {
    Pending(Vec<Continuation>),
    Completed,
    Abandoned,
}

struct JobSignal {
    state: Mutex<JobState>,
    finished: Condvar,
}

impl JobSignal {
    fn poll(&self) -> Option<bool> {
        match &*self.state.lock() {
            JobState::Pending(_) => None,
            JobState::Completed => Some(true),
            JobState::Abandoned => Some(false),
        }
    }

    fn wait(&self) -> Result<()> {
        let backoff = Backoff::new();
        while !backoff.is_completed() {
            if let Some(ok) = self.poll() {
                return if ok { Ok(()) } else { Err(EcsError::JobAbandoned) };
            }
            backoff.snooze();
        }

        let mut state = self.state.lock();
        loop {
            match &*state {
                JobState::Completed => return Ok(()),
                JobState::Abandoned => return Err(EcsError::JobAbandoned),
                JobState::Pending(_) => self.finished.wait(&mut state),
            }
        }
    }

    fn finish(&self, completed: bool) {
        let continuations = {
            let mut state = self.state.lock();
            let JobState::Pending(waiting) = &mut *state else {
                return;
            };
            let waiting = std::mem::take(waiting);
            *state = if completed {
                JobState::Completed
            } else {
                JobState::Abandoned
            };
            waiting
        };
        self.finished.notify_all();
        for continuation in continuations {
            continuation(completed);
        }
    }

    fn on_finish(&self, continuation: Continuation) {
        let outcome = {
            let mut state = self.state.lock();
            match &mut *state {
                JobState::Pending(waiting) => {
                    waiting.push(continuation);
                    return;
                }
                JobState::Completed => true,
                JobState::Abandoned => false,
            }
        };
        continuation(outcome);
    }
}

enum JobNode {
    Signal(JobSignal),
    Combined(SmallVec<[JobHandle; 4]>),
}

/// Opaque dependency token
#[derive(Clone, Default)]
pub struct JobHandle {
    node: Option<Arc<JobNode>>,
}

/// Producer side of a pending [`JobHandle`]
pub struct JobCompleter {
    node: Arc<JobNode>,
}

impl JobCompleter {
    /// Mark the work finished and wake every waiter
    pub fn complete(self) {
        if let JobNode::Signal(signal) = &*self.node {
            signal.finish(true);
        }
    }
}

impl Drop for JobCompleter {
    fn drop(&mut self) {
        if let JobNode::Signal(signal) = &*self.node {
            signal.finish(false);
        }
    }
}

impl fmt::Debug for JobCompleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCompleter").finish_non_exhaustive()
    }
}

struct JoinState {
    remaining: AtomicUsize,
    ok: AtomicBool,
    callback: Mutex<Option<Continuation>>,
}

impl JoinState {
    fn arrive(&self, ok: bool) {
        if !ok {
            self.ok.store(false, Ordering::Release);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let callback = self.callback.lock().take();
            if let Some(callback) = callback {
                callback(self.ok.load(Ordering::Acquire));
            }
        }
    }
}

impl JobHandle {
    /// A handle that is already complete
    pub fn completed() -> Self {
        Self::default()
    }

    /// A new pending handle and the completer that finishes it
    pub fn pending() -> (JobCompleter, JobHandle) {
        let node = Arc::new(JobNode::Signal(JobSignal {
            state: Mutex::new(JobState::Pending(Vec::new())),
            finished: Condvar::new(),
        }));
        (
            JobCompleter { node: node.clone() },
            JobHandle { node: Some(node) },
        )
    }

    /// One handle that finishes when all of `handles` have
    pub fn combine(handles: &[JobHandle]) -> JobHandle {
        let mut live: SmallVec<[JobHandle; 4]> = SmallVec::new();
        for handle in handles {
            if handle.is_completed() {
                continue;
            }
            if !live.iter().any(|h| h.same_node(handle)) {
                live.push(handle.clone());
            }
        }
        match live.len() {
            0 => JobHandle::completed(),
            1 => live.remove(0),
            _ => JobHandle {
                node: Some(Arc::new(JobNode::Combined(live))),
            },
        }
    }

    fn same_node(&self, other: &JobHandle) -> bool {
        match (&self.node, &other.node) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// True once the work finished successfully
    pub fn is_completed(&self) -> bool {
        match self.node.as_deref() {
            None => true,
            Some(JobNode::Signal(signal)) => signal.poll() == Some(true),
            Some(JobNode::Combined(handles)) => handles.iter().all(JobHandle::is_completed),
        }
    }

    /// Block until the work finishes
    pub fn complete(&self) -> Result<()> {
        match self.node.as_deref() {
            None => Ok(()),
            Some(JobNode::Signal(signal)) => signal.wait(),
            Some(JobNode::Combined(handles)) => {
                let mut result = Ok(());
                for handle in handles {
                    if let Err(err) = handle.complete() {
                        result = Err(err);
                    }
                }
                result
            }
        }
    }

    /// True if waiting on `self` also guarantees `other` finished
    pub fn depends_on(&self, other: &JobHandle) -> bool {
        other.is_completed() || self.reaches(other)
    }

    fn reaches(&self, other: &JobHandle) -> bool {
        if self.same_node(other) {
            return true;
        }
        if let Some(JobNode::Combined(parts)) = other.node.as_deref() {
            if parts.iter().all(|part| self.depends_on(part)) {
                return true;
            }
        }
        match self.node.as_deref() {
            Some(JobNode::Combined(handles)) => handles.iter().any(|h| h.reaches(other)),
            _ => false,
        }
    }

    /// Run `callback` once the work finishes; `true` means every part completed.
    /// Runs inline if already finished.
    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        match self.node.as_deref() {
            None => callback(true),
            Some(JobNode::Signal(signal)) => signal.on_finish(Box::new(callback)),
            Some(JobNode::Combined(handles)) => {
                let join = Arc::new(JoinState {
                    remaining: AtomicUsize::new(handles.len()),
                    ok: AtomicBool::new(true),
                    callback: Mutex::new(Some(Box::new(callback))),
                });
                for handle in handles {
                    let join = join.clone();
                    let arrive: Continuation = Box::new(move |ok| join.arrive(ok));
                    handle.when_complete(arrive);
                }
            }
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.node.as_deref() {
            None => "completed",
            Some(JobNode::Combined(_)) => "combined",
            Some(JobNode::Signal(signal)) => match signal.poll() {
                None => "pending",
                Some(true) => "completed",
                Some(false) => "abandoned",
            },
        };
        f.debug_tuple("JobHandle").field(&state).finish()
    }
}
