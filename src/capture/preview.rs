//! Renderable preview surface
//!
//! A handle the presentation side renders from. The renderer reports its
//! layout size back through [`PreviewSurface::report_layout`]; the capture
//! facade waits for a non-zero size before starting the session.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use super::frame::Frame;

/// Layout size reported by the renderer, in points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayoutSize {
    pub width: u32,
    pub height: u32,
}

impl LayoutSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions are non-zero
    pub fn is_renderable(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

struct SurfaceInner {
    id: u64,
    layout: watch::Sender<LayoutSize>,
    frames: watch::Receiver<Option<Frame>>,
}

/// Shared preview surface handle
#[derive(Clone)]
pub struct PreviewSurface {
    inner: Arc<SurfaceInner>,
}

impl PreviewSurface {
    pub(crate) fn new(id: u64, frames: watch::Receiver<Option<Frame>>) -> Self {
        let (layout, _) = watch::channel(LayoutSize::default());
        Self {
            inner: Arc::new(SurfaceInner { id, layout, frames }),
        }
    }

    /// Identifier, unique per session configuration
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Called by the renderer whenever its bounds change
    pub fn report_layout(&self, size: LayoutSize) {
        self.inner.layout.send_replace(size);
    }

    /// Last reported layout size
    pub fn layout(&self) -> LayoutSize {
        *self.inner.layout.borrow()
    }

    /// Wait until the renderer reports a non-zero layout
    pub async fn wait_until_renderable(&self) {
        let mut rx = self.inner.layout.subscribe();
        // The sender lives as long as `self`, so this only returns once
        // the predicate holds.
        let _ = rx.wait_for(LayoutSize::is_renderable).await;
    }

    /// Most recent frame delivered by the session, for drawing
    pub fn latest_frame(&self) -> Option<Frame> {
        self.inner.frames.borrow().clone()
    }
}

impl fmt::Debug for PreviewSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewSurface")
            .field("id", &self.inner.id)
            .field("layout", &self.layout())
            .finish()
    }
}
