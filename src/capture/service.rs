//! Capture facade
//!
//! Wraps the session manager behind a lifecycle the UI side can bind to
//! directly, guards against redundant configuration, and republishes the
//! preview surface. Must be created inside a tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::preview::PreviewSurface;
use super::session::CaptureSessionManager;

/// Snapshot of the facade's view of the session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub is_configured: bool,
    pub is_running: bool,
    pub preview_surface: Option<PreviewSurface>,
}

struct Inner {
    manager: Arc<CaptureSessionManager>,
    is_configured: AtomicBool,
    is_running: AtomicBool,
    preview_tx: watch::Sender<Option<PreviewSurface>>,
    pending_start: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn start(&self) {
        self.manager.start();
        self.is_running.store(true, Ordering::SeqCst);
    }

    fn cancel_pending_start(&self) {
        if let Some(handle) = self.pending_start.lock().take() {
            handle.abort();
        }
    }

    /// Start the session once the surface has somewhere to render
    fn schedule_start(self: &Arc<Self>, surface: PreviewSurface) {
        let inner = self.clone();
        let handle = tokio::spawn(async move {
            surface.wait_until_renderable().await;
            let layout = surface.layout();
            inner.start();
            info!(
                "Capture started with preview {} at {}x{}",
                surface.id(),
                layout.width,
                layout.height
            );
        });
        if let Some(previous) = self.pending_start.lock().replace(handle) {
            previous.abort();
        }
    }
}

/// Lifecycle facade over [`CaptureSessionManager`]
pub struct CaptureService {
    inner: Arc<Inner>,
    watcher: JoinHandle<()>,
}

impl CaptureService {
    pub fn new(manager: Arc<CaptureSessionManager>) -> Self {
        let (preview_tx, _) = watch::channel(None);
        let inner = Arc::new(Inner {
            manager,
            is_configured: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
            preview_tx,
            pending_start: Mutex::new(None),
        });

        let watch_inner = inner.clone();
        let mut surfaces = inner.manager.preview();
        let watcher = tokio::spawn(async move {
            while surfaces.changed().await.is_ok() {
                let surface = surfaces.borrow_and_update().clone();
                if let Some(surface) = surface {
                    debug!("Preview surface {} ready", surface.id());
                    watch_inner.preview_tx.send_replace(Some(surface.clone()));
                    watch_inner.schedule_start(surface);
                }
            }
        });

        Self { inner, watcher }
    }

    /// Configure the session once; later calls are no-ops
    pub fn configure(&self) {
        if self.inner.is_configured.swap(true, Ordering::SeqCst) {
            debug!("Camera already configured, skipping reconfiguration");
            return;
        }
        self.inner.manager.configure();
    }

    /// Forget the configured flag and configure again
    ///
    /// The retry path for when a camera becomes available after an earlier
    /// configuration found none.
    pub fn reconfigure(&self) {
        self.inner.is_configured.store(false, Ordering::SeqCst);
        self.configure();
    }

    pub fn start(&self) {
        info!("Starting camera service");
        self.inner.start();
    }

    pub fn stop(&self) {
        info!("Stopping camera service");
        self.inner.cancel_pending_start();
        self.inner.manager.stop();
        self.inner.is_running.store(false, Ordering::SeqCst);
    }

    /// Start only if this facade believes capture is stopped.
    /// Returns whether a start was issued.
    ///
    /// While the preview surface has no size yet the start is deferred,
    /// the same as after configuration.
    pub fn restart_if_needed(&self) -> bool {
        if self.inner.is_running.load(Ordering::SeqCst) {
            return false;
        }
        let surface = self.inner.preview_tx.borrow().clone();
        match surface {
            Some(surface) if !surface.layout().is_renderable() => {
                debug!("Preview {} not laid out yet, deferring restart", surface.id());
                self.inner.schedule_start(surface);
            }
            _ => {
                info!("Restarting camera session");
                self.inner.start();
            }
        }
        true
    }

    pub fn switch_camera(&self) {
        self.inner.manager.switch_camera();
    }

    /// Subscribe to the republished preview surface
    pub fn preview(&self) -> watch::Receiver<Option<PreviewSurface>> {
        self.inner.preview_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            is_configured: self.inner.is_configured.load(Ordering::SeqCst),
            is_running: self.inner.is_running.load(Ordering::SeqCst),
            preview_surface: self.inner.preview_tx.borrow().clone(),
        }
    }

    pub fn manager(&self) -> &Arc<CaptureSessionManager> {
        &self.inner.manager
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        self.watcher.abort();
        self.inner.cancel_pending_start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::preview::LayoutSize;
    use crate::capture::synthetic::SyntheticProvider;
    use crate::capture::{CaptureConfig, Facing};
    use std::time::Duration;

    fn service(provider: Arc<SyntheticProvider>) -> CaptureService {
        let config = CaptureConfig {
            max_fps: 100,
            switch_settle: Duration::ZERO,
            ..Default::default()
        };
        let manager = Arc::new(CaptureSessionManager::new(provider, config).unwrap());
        CaptureService::new(manager)
    }

    async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..300 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn test_configure_is_guarded() {
        let provider = Arc::new(SyntheticProvider::new(32, 32));
        let service = service(provider.clone());

        service.configure();
        service.configure();
        service.manager().flush().unwrap();

        assert!(service.state().is_configured);
        assert_eq!(service.manager().setup_count(), 1);
        assert_eq!(provider.acquisitions(), 1);
    }

    #[tokio::test]
    async fn test_restart_if_needed() {
        let provider = Arc::new(SyntheticProvider::new(32, 32));
        let service = service(provider);
        let mut preview = service.preview();

        service.configure();
        preview.wait_for(|p| p.is_some()).await.unwrap();
        let surface = service.state().preview_surface.unwrap();
        surface.report_layout(LayoutSize::new(390, 844));
        assert!(eventually(|| service.state().is_running).await);
        assert!(!service.restart_if_needed());

        service.stop();
        service.manager().flush().unwrap();
        assert!(!service.manager().is_running());

        assert!(service.restart_if_needed());
        service.manager().flush().unwrap();
        assert!(service.manager().is_running());
        assert!(service.state().is_running);
    }

    #[tokio::test]
    async fn test_start_deferred_until_layout() {
        let provider = Arc::new(SyntheticProvider::new(32, 32));
        let service = service(provider);
        let mut preview = service.preview();

        service.configure();
        tokio::time::timeout(Duration::from_secs(3), preview.wait_for(|p| p.is_some()))
            .await
            .expect("preview never published")
            .unwrap();
        let surface = service.state().preview_surface.unwrap();

        surface.report_layout(LayoutSize::new(0, 0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.manager().flush().unwrap();
        assert!(!service.manager().is_running());
        assert!(!service.state().is_running);

        surface.report_layout(LayoutSize::new(390, 844));
        assert!(eventually(|| service.state().is_running).await);
        service.manager().flush().unwrap();
        assert!(service.manager().is_running());
    }

    #[tokio::test]
    async fn test_stop_cancels_deferred_start() {
        let provider = Arc::new(SyntheticProvider::new(32, 32));
        let service = service(provider);
        let mut preview = service.preview();

        service.configure();
        preview.wait_for(|p| p.is_some()).await.unwrap();
        let surface = service.state().preview_surface.unwrap();

        service.stop();
        surface.report_layout(LayoutSize::new(390, 844));
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.manager().flush().unwrap();
        assert!(!service.manager().is_running());
    }

    #[tokio::test]
    async fn test_restart_before_layout_stays_deferred() {
        let provider = Arc::new(SyntheticProvider::new(32, 32));
        let service = service(provider);
        let mut preview = service.preview();

        service.configure();
        preview.wait_for(|p| p.is_some()).await.unwrap();
        let surface = service.state().preview_surface.unwrap();

        // Disappear and reappear before the renderer ever sized the surface
        service.stop();
        assert!(service.restart_if_needed());
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.manager().flush().unwrap();
        assert!(!service.manager().is_running());
        assert!(!service.state().is_running);

        surface.report_layout(LayoutSize::new(390, 844));
        assert!(eventually(|| service.state().is_running).await);
        service.manager().flush().unwrap();
        assert!(service.manager().is_running());
    }

    #[tokio::test]
    async fn test_unavailable_camera_scenario() {
        let provider = Arc::new(SyntheticProvider::with_facings(32, 32, &[]));
        let service = service(provider.clone());

        service.configure();
        service.manager().flush().unwrap();
        assert!(service.state().preview_surface.is_none());

        // Later calls stay no-ops, even once the device appears
        provider.set_available(Facing::Back, true);
        service.configure();
        service.manager().flush().unwrap();
        assert_eq!(provider.acquisitions(), 0);
        assert!(service.state().preview_surface.is_none());

        // Explicit retry picks it up
        service.reconfigure();
        service.manager().flush().unwrap();
        assert_eq!(provider.acquisitions(), 1);
        assert!(eventually(|| service.state().preview_surface.is_some()).await);
    }

    #[tokio::test]
    async fn test_switch_camera_delegates() {
        let provider = Arc::new(SyntheticProvider::new(32, 32));
        let service = service(provider);
        service.configure();
        service.switch_camera();
        service.manager().flush().unwrap();
        assert_eq!(service.manager().current_facing(), Some(Facing::Front));
    }
}
