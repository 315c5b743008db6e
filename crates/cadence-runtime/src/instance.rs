//! Networked program instances
//!
//! An [`Instance`] binds a UDP socket, owns one [`Engine`] behind a mutex
//! and optionally drives it from a background task. Ticks never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cadence_core::{CadenceError, CadenceResult};
use cadence_state::Collection;
use cadence_transport::{start_receive_loop, start_send_loop, Inbox, UdpTransport};

use crate::{CallbackId, Engine, EngineContext, InstanceOptions, Program, TickReport};

/// A program instance bound to a UDP address
pub struct Instance {
    engine: Arc<Mutex<Engine>>,
    inbox: Arc<Inbox>,
    local_addr: String,
    tick_interval: Option<Duration>,
    errors: Arc<Mutex<Vec<CadenceError>>>,
    stopping: Arc<AtomicBool>,
    stopped: bool,
    recv_task: Option<JoinHandle<()>>,
    send_task: Option<JoinHandle<()>>,
    driver: Option<JoinHandle<()>>,
}

impl Instance {
    /// Bind a socket and start the network loops. No tick runs yet.
    pub async fn bind(program: Program, options: InstanceOptions) -> CadenceResult<Self> {
        let InstanceOptions {
            config,
            channel_filter,
        } = options;
        config.validate()?;

        let transport = UdpTransport::bind(config.bind_addr).await?;
        let local_addr = transport.local_addr().to_string();

        let inbox = Arc::new(Inbox::new(config.max_inbound));
        let recv_task = start_receive_loop(transport.socket(), inbox.clone());
        let (link, send_task) = start_send_loop(transport.socket(), config.max_outbound);

        let tick_interval = config.tick_interval;
        let ctx = EngineContext::new(local_addr.clone())
            .with_config(config)
            .with_inbox(inbox.clone())
            .with_link(Arc::new(link))
            .with_filter(channel_filter);
        let engine = Engine::new(program, ctx);

        info!(addr = %local_addr, "instance bound");

        Ok(Instance {
            engine: Arc::new(Mutex::new(engine)),
            inbox,
            local_addr,
            tick_interval,
            errors: Arc::new(Mutex::new(Vec::new())),
            stopping: Arc::new(AtomicBool::new(false)),
            stopped: false,
            recv_task: Some(recv_task),
            send_task: Some(send_task),
            driver: None,
        })
    }

    /// Bound address, as it appears in address columns
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Shared engine handle
    pub fn engine(&self) -> Arc<Mutex<Engine>> {
        Arc::clone(&self.engine)
    }

    /// Run one tick now.
    pub fn tick(&self) -> CadenceResult<TickReport> {
        self.engine.lock().tick()
    }

    /// Run `f` against the engine, then one tick. Returns `f`'s result.
    pub fn sync_do<F, R>(&self, f: F) -> CadenceResult<R>
    where
        F: FnOnce(&mut Engine) -> CadenceResult<R>,
    {
        let mut engine = self.engine.lock();
        let result = f(&mut *engine)?;
        engine.tick()?;
        Ok(result)
    }

    /// Run `f` against the engine and schedule a tick without waiting.
    pub fn async_do<F, R>(&self, f: F) -> CadenceResult<R>
    where
        F: FnOnce(&mut Engine) -> CadenceResult<R>,
    {
        let result = {
            let mut engine = self.engine.lock();
            f(&mut *engine)?
        };
        self.inbox.wake();
        Ok(result)
    }

    pub fn register_callback<F>(&self, collection: &str, callback: F) -> CadenceResult<CallbackId>
    where
        F: FnMut(&Collection) + Send + 'static,
    {
        self.engine.lock().register_callback(collection, callback)
    }

    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        self.engine.lock().unregister_callback(id)
    }

    /// Errors raised by background ticks since the last call
    pub fn take_errors(&self) -> Vec<CadenceError> {
        std::mem::take(&mut *self.errors.lock())
    }

    pub fn is_running(&self) -> bool {
        self.driver.is_some()
    }

    /// Start the background driver.
    ///
    /// It ticks when the inbox receives a frame, when [`Instance::async_do`]
    /// wakes it, when the previous tick left follow-up work, and on every
    /// `tick_interval` if one is configured.
    pub fn run_bg(&mut self) {
        if self.driver.is_some() || self.stopped {
            return;
        }
        let engine = Arc::clone(&self.engine);
        let inbox = Arc::clone(&self.inbox);
        let errors = Arc::clone(&self.errors);
        let stopping = Arc::clone(&self.stopping);
        let interval = self.tick_interval;
        let addr = self.local_addr.clone();

        self.driver = Some(tokio::spawn(async move {
            // First tick runs bootstrap rules
            let mut followup = true;
            loop {
                if !followup {
                    match interval {
                        Some(period) => {
                            tokio::select! {
                                _ = inbox.notified() => {}
                                _ = tokio::time::sleep(period) => {}
                            }
                        }
                        None => inbox.notified().await,
                    }
                }
                if stopping.load(Ordering::Acquire) {
                    break;
                }

                let result = engine.lock().tick();
                followup = match result {
                    Ok(report) => report.pending,
                    Err(CadenceError::EngineStopped) => break,
                    Err(e) => {
                        error!(addr = %addr, "Background tick failed: {}", e);
                        errors.lock().push(e);
                        false
                    }
                };
                if followup {
                    tokio::task::yield_now().await;
                }
            }
            debug!(addr = %addr, "driver finished");
        }));
    }

    /// Stop the instance. Safe to call more than once.
    pub async fn stop(&mut self) -> CadenceResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.stopping.store(true, Ordering::Release);
        self.inbox.wake();

        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!(addr = %self.local_addr, "Driver task failed: {}", e);
            }
        }

        {
            let mut engine = self.engine.lock();
            if engine.has_pending_work() {
                if let Err(e) = engine.tick() {
                    warn!(addr = %self.local_addr, "Final tick failed: {}", e);
                    self.errors.lock().push(e);
                }
            }
            engine.stop();
        }

        if let Some(recv) = self.recv_task.take() {
            recv.abort();
        }
        // The engine dropped its link; the send loop drains and exits
        if let Some(send) = self.send_task.take() {
            if let Err(e) = send.await {
                warn!(addr = %self.local_addr, "Send loop failed: {}", e);
            }
        }

        info!(addr = %self.local_addr, "instance stopped");
        Ok(())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        for task in [
            self.driver.take(),
            self.recv_task.take(),
            self.send_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}
