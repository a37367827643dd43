// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Software-simulated device for running without GPU hardware.
//!
//! Each queue opened on a [`SimulatedBackend`] owns a worker thread that
//! drains commands from a channel in submission order, the same contract an
//! in-order device queue gives. Writes are therefore genuinely asynchronous:
//! [`CommandQueue::enqueue_write`] returns before the bytes land, and
//! [`CommandQueue::wait`] blocks on a condition variable until the worker
//! reports the transfer's sequence number as completed.
//!
//! Device memory is a map of host vectors bounded by the device's
//! configured capacity. Fresh buffers are filled with
//! [`UNINITIALISED_BYTE`] so code that trusts never-written memory shows up
//! in tests.

use crate::{
    BackendError, BackendResult, BufferId, CommandQueue, ComputeBackend, DeviceBuffer,
    TransferEvent,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Fill pattern of freshly created simulated buffers.
pub const UNINITIALISED_BYTE: u8 = 0xCD;

/// Description of one simulated device.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimulatedDevice {
    /// Name reported by device enumeration.
    pub name: String,
    /// Device memory capacity in bytes.
    pub memory_bytes: usize,
    /// Artificial delay applied to every transfer, in microseconds.
    #[serde(default)]
    pub transfer_latency_us: u64,
}

impl SimulatedDevice {
    /// Creates a device with the given name and memory capacity.
    pub fn new(name: impl Into<String>, memory_bytes: usize) -> Self {
        Self {
            name: name.into(),
            memory_bytes,
            transfer_latency_us: 0,
        }
    }

    /// Sets the per-transfer delay.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.transfer_latency_us = latency.as_micros() as u64;
        self
    }

    fn latency(&self) -> Duration {
        Duration::from_micros(self.transfer_latency_us)
    }
}

/// A backend whose devices live in host memory.
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    devices: Vec<SimulatedDevice>,
    /// Queues opened so far, for fault injection and accounting.
    queues: Mutex<Vec<Weak<QueueShared>>>,
}

impl SimulatedBackend {
    /// Creates a backend exposing `devices` in order.
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            devices,
            queues: Mutex::new(Vec::new()),
        }
    }

    /// Creates a backend with one device of `memory_bytes` capacity.
    pub fn single(memory_bytes: usize) -> Self {
        Self::new(vec![SimulatedDevice::new("Simulated GPU 0", memory_bytes)])
    }

    /// Returns the configured devices.
    pub fn devices(&self) -> &[SimulatedDevice] {
        &self.devices
    }

    /// Simulates losing every device: in-flight and future operations on
    /// all open queues fail with [`BackendError::DeviceLost`].
    pub fn lose_device(&self, reason: &str) {
        for shared in self.live_queues() {
            shared.mark_lost(reason);
        }
    }

    /// Total bytes currently held by buffers on all open queues.
    pub fn allocated_bytes(&self) -> usize {
        self.live_queues()
            .iter()
            .map(|shared| lock(&shared.memory).used)
            .sum()
    }

    fn live_queues(&self) -> Vec<Arc<QueueShared>> {
        let mut queues = lock(&self.queues);
        queues.retain(|weak| weak.strong_count() > 0);
        queues.iter().filter_map(Weak::upgrade).collect()
    }
}

impl ComputeBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn list_devices(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.name.clone()).collect()
    }

    fn open_queue(&self, index: usize) -> BackendResult<Arc<dyn CommandQueue>> {
        if self.devices.is_empty() {
            return Err(BackendError::NoDevice);
        }
        let device = self
            .devices
            .get(index)
            .ok_or(BackendError::InvalidDevice {
                index,
                available: self.devices.len(),
            })?
            .clone();

        let queue = SimulatedQueue::spawn(device)?;
        lock(&self.queues).push(Arc::downgrade(&queue.shared));
        Ok(Arc::new(queue))
    }
}

// ── Queue internals ────────────────────────────────────────────

#[derive(Debug, Default)]
struct DeviceMemory {
    buffers: HashMap<BufferId, Vec<u8>>,
    used: usize,
    next_id: u64,
}

#[derive(Debug, Default)]
struct Progress {
    /// Sequence number of the last enqueued write.
    submitted: u64,
    /// Sequence number of the last write the worker applied.
    completed: u64,
    lost: Option<String>,
}

#[derive(Debug)]
struct QueueShared {
    device: SimulatedDevice,
    memory: Mutex<DeviceMemory>,
    progress: Mutex<Progress>,
    completed: Condvar,
}

impl QueueShared {
    fn mark_lost(&self, reason: &str) {
        let mut progress = lock(&self.progress);
        if progress.lost.is_none() {
            tracing::warn!(device = %self.device.name, reason, "simulated device lost");
            progress.lost = Some(reason.to_string());
        }
        drop(progress);
        self.completed.notify_all();
    }

    fn check_alive(&self) -> BackendResult<()> {
        match &lock(&self.progress).lost {
            Some(reason) => Err(BackendError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }
}

enum Command {
    Write {
        seq: u64,
        id: BufferId,
        offset: usize,
        data: Bytes,
    },
    Read {
        id: BufferId,
        offset: usize,
        len: usize,
        reply: mpsc::Sender<BackendResult<Vec<u8>>>,
    },
    Shutdown,
}

/// An in-order command queue on a simulated device.
#[derive(Debug)]
pub struct SimulatedQueue {
    shared: Arc<QueueShared>,
    commands: Mutex<mpsc::Sender<Command>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedQueue {
    fn spawn(device: SimulatedDevice) -> BackendResult<Self> {
        let thread_name = format!("simq-{}", device.name);
        let shared = Arc::new(QueueShared {
            device,
            memory: Mutex::new(DeviceMemory::default()),
            progress: Mutex::new(Progress::default()),
            completed: Condvar::new(),
        });

        let (tx, rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_worker(worker_shared, rx))
            .map_err(|e| BackendError::DeviceLost(format!("cannot start queue worker: {e}")))?;

        tracing::info!(
            device = %shared.device.name,
            memory_bytes = shared.device.memory_bytes,
            "simulated command queue opened"
        );

        Ok(Self {
            shared,
            commands: Mutex::new(tx),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, command: Command) -> BackendResult<()> {
        lock(&self.commands)
            .send(command)
            .map_err(|_| BackendError::QueueClosed)
    }

    fn check_range(&self, buffer: &DeviceBuffer, offset: usize, len: usize) -> BackendResult<()> {
        let memory = lock(&self.shared.memory);
        let stored = memory
            .buffers
            .get(&buffer.id())
            .ok_or(BackendError::UnknownBuffer(buffer.id()))?;
        let capacity = stored.len();
        match offset.checked_add(len) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(BackendError::OutOfBounds {
                offset,
                len,
                capacity,
            }),
        }
    }
}

impl CommandQueue for SimulatedQueue {
    fn device_name(&self) -> &str {
        &self.shared.device.name
    }

    fn create_buffer(&self, size: usize) -> BackendResult<DeviceBuffer> {
        self.shared.check_alive()?;

        let mut memory = lock(&self.shared.memory);
        let free = self.shared.device.memory_bytes.saturating_sub(memory.used);
        if size > free {
            return Err(BackendError::OutOfDeviceMemory { size, free });
        }

        memory.next_id += 1;
        let id = BufferId::new(memory.next_id);
        memory.buffers.insert(id, vec![UNINITIALISED_BYTE; size]);
        memory.used += size;

        tracing::trace!(buffer = %id, size, "simulated buffer created");
        Ok(DeviceBuffer::new(id, size))
    }

    fn enqueue_read(
        &self,
        buffer: &DeviceBuffer,
        offset: usize,
        dst: &mut [u8],
    ) -> BackendResult<()> {
        self.check_range(buffer, offset, dst.len())?;
        self.shared.check_alive()?;

        let (reply, response) = mpsc::channel();
        self.send(Command::Read {
            id: buffer.id(),
            offset,
            len: dst.len(),
            reply,
        })?;

        let bytes = response.recv().map_err(|_| BackendError::QueueClosed)??;
        dst.copy_from_slice(&bytes);
        Ok(())
    }

    fn enqueue_write(
        &self,
        buffer: &DeviceBuffer,
        offset: usize,
        data: Bytes,
    ) -> BackendResult<TransferEvent> {
        self.check_range(buffer, offset, data.len())?;

        // Sequence numbers are assigned and sent under the progress lock so
        // channel order matches sequence order.
        let mut progress = lock(&self.shared.progress);
        if let Some(reason) = &progress.lost {
            return Err(BackendError::DeviceLost(reason.clone()));
        }
        let seq = progress.submitted + 1;
        let len = data.len();
        self.send(Command::Write {
            seq,
            id: buffer.id(),
            offset,
            data,
        })?;
        progress.submitted = seq;

        tracing::trace!(buffer = %buffer.id(), offset, len, seq, "write enqueued");
        Ok(TransferEvent::new(seq))
    }

    fn wait(&self, event: &TransferEvent) -> BackendResult<()> {
        let mut progress = lock(&self.shared.progress);
        loop {
            if progress.completed >= event.seq() {
                return Ok(());
            }
            if let Some(reason) = &progress.lost {
                return Err(BackendError::DeviceLost(reason.clone()));
            }
            progress = self
                .shared
                .completed
                .wait(progress)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn release_buffer(&self, buffer: DeviceBuffer) {
        let mut memory = lock(&self.shared.memory);
        if let Some(stored) = memory.buffers.remove(&buffer.id()) {
            memory.used -= stored.len();
            tracing::trace!(buffer = %buffer.id(), "simulated buffer released");
        }
    }
}

impl Drop for SimulatedQueue {
    fn drop(&mut self) {
        // Commands ahead of the shutdown marker still run, so pending
        // writes land before the worker exits.
        let _ = self.send(Command::Shutdown);
        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(device = %self.shared.device.name, "queue worker panicked");
            }
        }
    }
}

fn run_worker(shared: Arc<QueueShared>, commands: mpsc::Receiver<Command>) {
    let latency = shared.device.latency();

    while let Ok(command) = commands.recv() {
        match command {
            Command::Write {
                seq,
                id,
                offset,
                data,
            } => {
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                if shared.check_alive().is_err() {
                    continue;
                }
                if let Some(stored) = lock(&shared.memory).buffers.get_mut(&id) {
                    stored[offset..offset + data.len()].copy_from_slice(&data);
                }
                lock(&shared.progress).completed = seq;
                shared.completed.notify_all();
            }
            Command::Read {
                id,
                offset,
                len,
                reply,
            } => {
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                let result = shared.check_alive().and_then(|()| {
                    lock(&shared.memory)
                        .buffers
                        .get(&id)
                        .map(|stored| stored[offset..offset + len].to_vec())
                        .ok_or(BackendError::UnknownBuffer(id))
                });
                let _ = reply.send(result);
            }
            Command::Shutdown => break,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SimulatedBackend {
        SimulatedBackend::single(1024)
    }

    #[test]
    fn test_list_devices() {
        let b = SimulatedBackend::new(vec![
            SimulatedDevice::new("gpu-a", 1024),
            SimulatedDevice::new("gpu-b", 2048),
        ]);
        assert!(b.is_available());
        assert_eq!(b.list_devices(), vec!["gpu-a", "gpu-b"]);
    }

    #[test]
    fn test_no_devices() {
        let b = SimulatedBackend::default();
        assert!(!b.is_available());
        assert_eq!(b.open_queue(0).unwrap_err(), BackendError::NoDevice);
    }

    #[test]
    fn test_open_invalid_index() {
        let err = backend().open_queue(3).unwrap_err();
        assert_eq!(
            err,
            BackendError::InvalidDevice {
                index: 3,
                available: 1
            }
        );
    }

    #[test]
    fn test_fresh_buffer_is_garbage() {
        let b = backend();
        let q = b.open_queue(0).unwrap();
        let buf = q.create_buffer(64).unwrap();

        let mut out = [0u8; 64];
        q.enqueue_read(&buf, 0, &mut out).unwrap();
        assert!(out.iter().all(|&x| x == UNINITIALISED_BYTE));
    }

    #[test]
    fn test_write_wait_read() {
        let b = backend();
        let q = b.open_queue(0).unwrap();
        let buf = q.create_buffer(64).unwrap();

        let ev = q
            .enqueue_write(&buf, 8, Bytes::from_static(b"hello"))
            .unwrap();
        q.wait(&ev).unwrap();

        let mut out = [0u8; 5];
        q.enqueue_read(&buf, 8, &mut out).unwrap();
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn test_read_is_ordered_after_writes() {
        let b = SimulatedBackend::new(vec![
            SimulatedDevice::new("slow", 1024).with_latency(Duration::from_millis(2))
        ]);
        let q = b.open_queue(0).unwrap();
        let buf = q.create_buffer(4).unwrap();

        q.enqueue_write(&buf, 0, Bytes::from_static(b"aaaa")).unwrap();
        q.enqueue_write(&buf, 0, Bytes::from_static(b"bbbb")).unwrap();

        // No wait: the read still queues behind both writes.
        let mut out = [0u8; 4];
        q.enqueue_read(&buf, 0, &mut out).unwrap();
        assert_eq!(&out, b"bbbb");
    }

    #[test]
    fn test_event_sequence_increases() {
        let b = backend();
        let q = b.open_queue(0).unwrap();
        let buf = q.create_buffer(8).unwrap();

        let e1 = q.enqueue_write(&buf, 0, Bytes::from_static(b"a")).unwrap();
        let e2 = q.enqueue_write(&buf, 1, Bytes::from_static(b"b")).unwrap();
        assert!(e2 > e1);

        q.wait(&e2).unwrap();
        // Waiting on an older event after a newer one completed is fine.
        q.wait(&e1).unwrap();
    }

    #[test]
    fn test_out_of_memory() {
        let b = backend();
        let q = b.open_queue(0).unwrap();
        let _a = q.create_buffer(1000).unwrap();

        let err = q.create_buffer(100).unwrap_err();
        assert_eq!(err, BackendError::OutOfDeviceMemory { size: 100, free: 24 });
    }

    #[test]
    fn test_release_returns_memory() {
        let b = backend();
        let q = b.open_queue(0).unwrap();
        let buf = q.create_buffer(1000).unwrap();
        assert_eq!(b.allocated_bytes(), 1000);

        q.release_buffer(buf);
        assert_eq!(b.allocated_bytes(), 0);
        assert!(q.create_buffer(1000).is_ok());
    }

    #[test]
    fn test_out_of_bounds() {
        let b = backend();
        let q = b.open_queue(0).unwrap();
        let buf = q.create_buffer(16).unwrap();

        let err = q
            .enqueue_write(&buf, 12, Bytes::from_static(b"12345"))
            .unwrap_err();
        assert!(matches!(err, BackendError::OutOfBounds { capacity: 16, .. }));

        let mut out = [0u8; 4];
        assert!(q.enqueue_read(&buf, 13, &mut out).is_err());
    }

    #[test]
    fn test_unknown_buffer() {
        let b = backend();
        let q = b.open_queue(0).unwrap();
        let foreign = DeviceBuffer::new(BufferId::new(99), 16);

        let mut out = [0u8; 4];
        let err = q.enqueue_read(&foreign, 0, &mut out).unwrap_err();
        assert_eq!(err, BackendError::UnknownBuffer(BufferId::new(99)));
    }

    #[test]
    fn test_lost_device_fails_pending_wait() {
        let b = SimulatedBackend::new(vec![
            SimulatedDevice::new("flaky", 1024).with_latency(Duration::from_millis(50))
        ]);
        let q = b.open_queue(0).unwrap();
        let buf = q.create_buffer(4).unwrap();

        let ev = q.enqueue_write(&buf, 0, Bytes::from_static(b"data")).unwrap();
        b.lose_device("reset");

        assert_eq!(q.wait(&ev).unwrap_err(), BackendError::DeviceLost("reset".into()));
        assert!(q.create_buffer(4).is_err());
        assert!(q.enqueue_write(&buf, 0, Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn test_drop_drains_pending_writes() {
        let b = SimulatedBackend::new(vec![
            SimulatedDevice::new("slow", 1024).with_latency(Duration::from_millis(1))
        ]);
        let q = b.open_queue(0).unwrap();
        let buf = q.create_buffer(4).unwrap();
        for _ in 0..5 {
            q.enqueue_write(&buf, 0, Bytes::from_static(b"zzzz")).unwrap();
        }
        // Joining the worker must not hang.
        drop(q);
        assert_eq!(b.allocated_bytes(), 0);
    }

    #[test]
    fn test_device_serde() {
        let json = r#"{"name":"gpu","memory_bytes":4096}"#;
        let d: SimulatedDevice = serde_json::from_str(json).unwrap();
        assert_eq!(d, SimulatedDevice::new("gpu", 4096));
        assert_eq!(d.transfer_latency_us, 0);
    }
}
