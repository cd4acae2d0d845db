//! Handles passed to every tool invocation.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A labelled pin drawn on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMarker {
    pub position: LatLng,
    pub label: String,
}

/// Insets, in pixels, that UI chrome covers on each edge of the map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MapPadding {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

/// The map rendering surface owned by the host.
pub trait MapSurface: Send + Sync {
    /// Move the camera to `center`, keeping the padding clear.
    fn fly_to(&self, center: LatLng, zoom: Option<f64>, padding: MapPadding);

    /// Replace the displayed markers.
    fn show_markers(&self, markers: &[MapMarker]);

    /// Draw a route polyline.
    fn show_route(&self, path: &[LatLng]);

    /// Remove markers and routes.
    fn clear(&self);
}

/// Resolves free-form place names.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<Option<LatLng>>;
}

/// UI-affecting setters exposed to tools.
pub trait UiHooks: Send + Sync {
    /// Show a short status line.
    fn set_status(&self, text: &str);

    /// Open a detail panel rendering `payload`.
    fn show_panel(&self, payload: &Value);
}

/// A failure reported by detached follow-up work.
#[derive(Debug, Clone, PartialEq)]
pub struct DetachedFailure {
    pub label: String,
    pub error: String,
}

struct TasksInner {
    token: CancellationToken,
    failures_tx: mpsc::UnboundedSender<DetachedFailure>,
    failures_rx: Option<mpsc::UnboundedReceiver<DetachedFailure>>,
}

/// Spawner for work a tool starts but does not wait on.
///
/// Every task is tied to the current cancellation token; [`cancel_all`]
/// stops them and arms a fresh token for the next connection. Errors and
/// panics are sent on a single failure channel.
///
/// [`cancel_all`]: DetachedTasks::cancel_all
#[derive(Clone)]
pub struct DetachedTasks {
    inner: Arc<Mutex<TasksInner>>,
}

impl Default for DetachedTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl DetachedTasks {
    pub fn new() -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(TasksInner {
                token: CancellationToken::new(),
                failures_tx,
                failures_rx: Some(failures_rx),
            })),
        }
    }

    /// Spawn `fut` on the runtime.
    pub fn spawn<F>(&self, label: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        let (token, failures) = {
            let inner = self.inner.lock();
            (inner.token.clone(), inner.failures_tx.clone())
        };

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(task = %label, "Detached task cancelled");
                }
                outcome = AssertUnwindSafe(fut).catch_unwind() => {
                    let error = match outcome {
                        Ok(Ok(())) => return,
                        Ok(Err(e)) => e.to_string(),
                        Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
                    };
                    tracing::warn!(task = %label, error = %error, "Detached task failed");
                    let _ = failures.send(DetachedFailure { label, error });
                }
            }
        });
    }

    /// Cancel every running task.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock();
        inner.token.cancel();
        inner.token = CancellationToken::new();
    }

    /// Take the failure receiver. Only the first caller gets it.
    pub fn take_failures(&self) -> Option<mpsc::UnboundedReceiver<DetachedFailure>> {
        self.inner.lock().failures_rx.take()
    }
}

impl std::fmt::Debug for DetachedTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetachedTasks").finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Read-only handles every tool receives.
///
/// The host builds one context and hands it to the dispatcher, which only
/// passes it through. Handles are optional so headless hosts can omit them.
#[derive(Clone, Default)]
pub struct ToolContext {
    map: Option<Arc<dyn MapSurface>>,
    geocoder: Option<Arc<dyn Geocoder>>,
    ui: Option<Arc<dyn UiHooks>>,
    padding: MapPadding,
    tasks: DetachedTasks,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_map(mut self, map: Arc<dyn MapSurface>) -> Self {
        self.map = Some(map);
        self
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_ui(mut self, ui: Arc<dyn UiHooks>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn with_padding(mut self, padding: MapPadding) -> Self {
        self.padding = padding;
        self
    }

    pub fn map(&self) -> Option<&Arc<dyn MapSurface>> {
        self.map.as_ref()
    }

    pub fn geocoder(&self) -> Option<&Arc<dyn Geocoder>> {
        self.geocoder.as_ref()
    }

    pub fn ui(&self) -> Option<&Arc<dyn UiHooks>> {
        self.ui.as_ref()
    }

    pub fn padding(&self) -> MapPadding {
        self.padding
    }

    /// The detached task spawner shared by all tools.
    pub fn tasks(&self) -> &DetachedTasks {
        &self.tasks
    }

    /// Run follow-up work without holding up the tool response.
    pub fn spawn_detached<F>(&self, label: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(label, fut);
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("map", &self.map.is_some())
            .field("geocoder", &self.geocoder.is_some())
            .field("ui", &self.ui.is_some())
            .field("padding", &self.padding)
            .finish()
    }
}
