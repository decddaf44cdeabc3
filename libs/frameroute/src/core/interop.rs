// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Graphics-interop worker and resource registration.
//!
//! Graphics-API objects are only valid on the thread that owns their
//! context, so every interop operation is marshalled to a dedicated worker
//! and the caller blocks on the result. Registered resources are cached per
//! (buffer, context) on the buffer itself; see `core::frame`.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::core::device::{DevicePtr, MapAccess};
use crate::core::error::{Result, RouteError};

/// Identity of a graphics buffer object (one per plane).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GraphicsObjectId(pub u64);

/// Identity of a graphics context / its owning worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GraphicsContextId(pub u64);

/// Handle to a graphics object registered with the device copy engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InteropHandle(pub u64);

/// Access mode when mapping an interop resource into device address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapDirection {
    /// The device reads from the graphics object.
    ReadOnly,
    /// The device overwrites the graphics object; prior contents discarded.
    WriteDiscard,
}

/// Graphics subsystem operations. All methods are only ever invoked on the
/// worker thread owning the context.
pub trait GraphicsBackend: Send {
    fn context_id(&self) -> GraphicsContextId;

    /// Whether the graphics context shares a device with the copy engine.
    fn is_device_compatible(&self) -> bool;

    /// Register a graphics object for device access.
    fn register(&mut self, object: GraphicsObjectId) -> Result<InteropHandle>;

    /// Release a registration. Idempotent.
    fn unregister(&mut self, handle: InteropHandle);

    /// Flag a pending transfer so the graphics side flushes or reloads its
    /// object around the copy.
    fn mark_pending_transfer(&mut self, object: GraphicsObjectId, to_graphics: bool);

    /// Map a registered object into device address space.
    fn map(&mut self, handle: InteropHandle, dir: MapDirection) -> Result<DevicePtr>;

    /// Unmap a previously mapped object.
    fn unmap(&mut self, handle: InteropHandle);

    /// Map an object's bytes into host memory (staged path).
    fn map_host(&mut self, object: GraphicsObjectId, access: MapAccess) -> Result<Vec<u8>>;

    /// Release a host mapping, writing `data` back when mapped for write.
    fn unmap_host(
        &mut self,
        object: GraphicsObjectId,
        data: Vec<u8>,
        access: MapAccess,
    ) -> Result<()>;
}

type Task = Box<dyn FnOnce(&mut dyn GraphicsBackend) + Send>;

enum Job {
    Run(Task),
    Shutdown,
}

/// Cheap-to-clone submission handle for the interop worker.
///
/// `submit` is a rendezvous: the closure runs on the worker thread and the
/// caller blocks until it completes. `submit_detached` queues without
/// waiting and is reserved for teardown work that may run from any thread.
#[derive(Clone)]
pub struct InteropWorkerHandle {
    tx: Sender<Job>,
    context_id: GraphicsContextId,
    device_compatible: bool,
}

impl InteropWorkerHandle {
    pub fn context_id(&self) -> GraphicsContextId {
        self.context_id
    }

    /// Whether the worker's graphics context shares a device with the copy
    /// engine. Queried from the backend once, at spawn.
    pub fn device_compatible(&self) -> bool {
        self.device_compatible
    }

    pub fn submit<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn GraphicsBackend) -> R + Send + 'static,
    {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        self.tx
            .send(Job::Run(Box::new(move |backend| {
                let _ = result_tx.send(f(backend));
            })))
            .map_err(|_| RouteError::Resource("interop worker is gone".into()))?;
        result_rx
            .recv()
            .map_err(|_| RouteError::Resource("interop worker dropped the job".into()))
    }

    pub fn submit_detached<F>(&self, f: F)
    where
        F: FnOnce(&mut dyn GraphicsBackend) + Send + 'static,
    {
        let _ = self.tx.send(Job::Run(Box::new(f)));
    }
}

/// Dedicated thread owning a graphics context.
pub struct InteropWorker {
    handle: InteropWorkerHandle,
    join: Option<JoinHandle<()>>,
}

impl InteropWorker {
    /// Spawn the worker; the backend moves onto the worker thread and never
    /// leaves it.
    pub fn spawn(backend: Box<dyn GraphicsBackend>) -> Result<Self> {
        let context_id = backend.context_id();
        let device_compatible = backend.is_device_compatible();
        let (tx, rx): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
        let join = thread::Builder::new()
            .name("frameroute-interop".into())
            .spawn(move || {
                let mut backend = backend;
                for job in rx {
                    match job {
                        Job::Run(task) => task(backend.as_mut()),
                        Job::Shutdown => break,
                    }
                }
            })
            .map_err(|e| RouteError::Resource(format!("failed to spawn interop worker: {e}")))?;
        Ok(Self {
            handle: InteropWorkerHandle {
                tx,
                context_id,
                device_compatible,
            },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> InteropWorkerHandle {
        self.handle.clone()
    }

    pub fn context_id(&self) -> GraphicsContextId {
        self.handle.context_id
    }
}

impl Drop for InteropWorker {
    fn drop(&mut self) {
        // An explicit shutdown job ends the loop after everything queued
        // ahead of it (including detached teardown) has drained. Handles
        // held by cached buffer resources cannot keep the worker alive;
        // their late submissions land in a closed channel and are dropped.
        let _ = self.handle.tx.send(Job::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// A registered interop resource cached on a frame buffer.
///
/// Dropping the last reference marshals the unregister back to the owning
/// worker thread; the registration never outlives the buffer it belongs to.
pub struct InteropResource {
    handle: InteropHandle,
    object: GraphicsObjectId,
    worker: InteropWorkerHandle,
}

impl InteropResource {
    pub fn new(handle: InteropHandle, object: GraphicsObjectId, worker: InteropWorkerHandle) -> Self {
        Self {
            handle,
            object,
            worker,
        }
    }

    pub fn handle(&self) -> InteropHandle {
        self.handle
    }

    pub fn object(&self) -> GraphicsObjectId {
        self.object
    }
}

impl Drop for InteropResource {
    fn drop(&mut self) {
        let handle = self.handle;
        self.worker.submit_detached(move |backend| {
            backend.unregister(handle);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGraphicsBackend;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn submit_runs_on_worker_thread_and_blocks_for_result() {
        let backend = MockGraphicsBackend::new_standalone(GraphicsContextId(7));
        let worker = InteropWorker::spawn(Box::new(backend)).unwrap();
        let caller = std::thread::current().id();

        let (ctx, worker_thread) = worker
            .handle()
            .submit(move |b| (b.context_id(), std::thread::current().id()))
            .unwrap();
        assert_eq!(ctx, GraphicsContextId(7));
        assert_ne!(worker_thread, caller);
    }

    #[test]
    fn jobs_are_serialized_in_submission_order() {
        let backend = MockGraphicsBackend::new_standalone(GraphicsContextId(1));
        let worker = InteropWorker::spawn(Box::new(backend)).unwrap();
        let seq = Arc::new(AtomicU64::new(0));
        for i in 0..32u64 {
            let seq = Arc::clone(&seq);
            let got = worker
                .handle()
                .submit(move |_| seq.fetch_add(1, Ordering::SeqCst) == i)
                .unwrap();
            assert!(got);
        }
    }
}
