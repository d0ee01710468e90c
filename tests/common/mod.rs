// Copyright 2025 dentsusoken
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

#![allow(dead_code)]

use concurrency_safe::locking::{LockBackend, LockTimeoutValue, to_lock_id};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

/// A key held by a background thread until [`Holder::finish`] or drop.
pub struct Holder {
    done: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Holder {
    /// Blocks until the background thread owns `key`.
    pub fn hold<B>(backend: Arc<B>, key: &str) -> Self
    where
        B: LockBackend + ?Sized + 'static,
    {
        let id = to_lock_id(key);
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            assert!(backend.acquire(id, LockTimeoutValue::Infinite).unwrap());
            ready_tx.send(()).unwrap();
            let _ = done_rx.recv();
            backend.release(id).unwrap();
        });
        ready_rx.recv().unwrap();

        Self {
            done: Some(done_tx),
            handle: Some(handle),
        }
    }

    pub fn finish(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

impl Drop for Holder {
    fn drop(&mut self) {
        self.stop();
    }
}
