use std::sync::atomic::Ordering;
use std::sync::Arc;

use portable_atomic::{AtomicBool, AtomicU64};
use tokio::sync::mpsc;

use crate::engine::{CallbackCategory, ConnectionHandle, EngineEvent, EventSink, MediaEngine};
use crate::error::{Error, Result};

/// ConnectionLifecycle owns the native connection handle and enforces the
/// teardown order: callbacks are unregistered before the engine closes and
/// destroys the connection, and the handle is replaced by
/// [`ConnectionHandle::NONE`] last.
///
/// Senders, data channels and the dispatcher share it to reach the engine
/// without holding the connection itself.
pub(crate) struct ConnectionLifecycle {
    engine: Arc<dyn MediaEngine>,
    handle: AtomicU64,
    is_closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLifecycle")
            .field("handle", &self.raw_handle())
            .field("is_closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionLifecycle {
    pub(crate) fn new(engine: Arc<dyn MediaEngine>, handle: ConnectionHandle) -> Self {
        ConnectionLifecycle {
            engine,
            handle: AtomicU64::new(handle.0),
            is_closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::SeqCst)
    }

    /// handle returns the native handle for an engine call, or
    /// `ErrConnectionClosed` once close has started.
    pub(crate) fn handle(&self) -> Result<ConnectionHandle> {
        if self.is_closed() {
            return Err(Error::ErrConnectionClosed);
        }
        let handle = self.raw_handle();
        if handle.is_none() {
            return Err(Error::ErrConnectionClosed);
        }
        Ok(handle)
    }

    pub(crate) fn raw_handle(&self) -> ConnectionHandle {
        ConnectionHandle(self.handle.load(Ordering::SeqCst))
    }

    /// register_callbacks hands the engine one sink per category. On failure
    /// the categories already registered are unregistered again.
    pub(crate) fn register_callbacks(&self, tx: &mpsc::UnboundedSender<EngineEvent>) -> Result<()> {
        let handle = self.handle()?;
        for (i, category) in CallbackCategory::ALL.iter().enumerate() {
            let sink = EventSink::new(*category, tx.clone());
            if let Err(err) = self.engine.register_callback(handle, *category, sink) {
                for registered in &CallbackCategory::ALL[..i] {
                    self.engine.unregister_callback(handle, *registered);
                }
                return Err(Error::new(format!(
                    "failed to register {category} callback: {err}"
                )));
            }
        }
        Ok(())
    }

    /// try_claim_close marks the connection closed. Exactly one caller wins.
    pub(crate) fn try_claim_close(&self) -> bool {
        self.is_closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn unregister_callbacks(&self, handle: ConnectionHandle) {
        for category in CallbackCategory::ALL {
            self.engine.unregister_callback(handle, category);
        }
    }

    /// release stops network activity and destroys the native connection.
    /// The connection is destroyed even if closing it failed.
    pub(crate) async fn release(&self, handle: ConnectionHandle) -> Result<()> {
        let result = self
            .engine
            .close_connection(handle)
            .await
            .map_err(|err| Error::new(format!("failed to close {handle}: {err}")));
        self.engine.destroy_connection(handle);
        result
    }

    pub(crate) fn clear_handle(&self) {
        self.handle.store(ConnectionHandle::NONE.0, Ordering::SeqCst);
    }
}

impl Drop for ConnectionLifecycle {
    fn drop(&mut self) {
        // Dropped without close: tear down synchronously, skipping the
        // async network shutdown.
        if self.try_claim_close() {
            let handle = self.raw_handle();
            if !handle.is_none() {
                log::warn!("{handle} dropped without close, destroying it");
                self.unregister_callbacks(handle);
                self.engine.destroy_connection(handle);
                self.clear_handle();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::loopback::LoopbackEngine;
    use crate::peer_connection::configuration::RTCConfiguration;

    async fn lifecycle(engine: &Arc<LoopbackEngine>) -> ConnectionLifecycle {
        let handle = engine
            .create_connection(&RTCConfiguration::default())
            .await
            .unwrap();
        ConnectionLifecycle::new(Arc::clone(engine) as Arc<dyn MediaEngine>, handle)
    }

    #[tokio::test]
    async fn test_lifecycle_teardown_order() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::default());
        let lifecycle = lifecycle(&engine).await;
        let handle = lifecycle.handle()?;

        let (tx, _rx) = mpsc::unbounded_channel();
        lifecycle.register_callbacks(&tx)?;
        assert_eq!(
            engine.registered_callback_count(handle),
            CallbackCategory::ALL.len()
        );

        assert!(lifecycle.try_claim_close());
        assert!(!lifecycle.try_claim_close());
        assert!(matches!(lifecycle.handle(), Err(Error::ErrConnectionClosed)));

        lifecycle.unregister_callbacks(handle);
        assert_eq!(engine.registered_callback_count(handle), 0);
        lifecycle.release(handle).await?;
        lifecycle.clear_handle();

        assert!(engine.is_destroyed(handle));
        assert!(lifecycle.raw_handle().is_none());

        let log = engine.op_log();
        let last_unregister = log
            .iter()
            .rposition(|op| op.starts_with("unregister_callback"))
            .unwrap();
        let close = log
            .iter()
            .position(|op| op.starts_with("close_connection"))
            .unwrap();
        let destroy = log
            .iter()
            .position(|op| op.starts_with("destroy_connection"))
            .unwrap();
        assert!(last_unregister < close);
        assert!(close < destroy);

        Ok(())
    }

    #[tokio::test]
    async fn test_lifecycle_drop_destroys_connection() {
        let engine = Arc::new(LoopbackEngine::default());
        let lifecycle = lifecycle(&engine).await;
        let handle = lifecycle.raw_handle();
        let (tx, _rx) = mpsc::unbounded_channel();
        lifecycle.register_callbacks(&tx).unwrap();

        drop(lifecycle);

        assert!(engine.is_destroyed(handle));
        assert_eq!(engine.registered_callback_count(handle), 0);
    }
}
