//! Fire-and-forget background work.
//!
//! Memory extraction, summarization and usage recording must never fail or
//! delay the turn that triggered them. Tasks run on the tokio runtime and are
//! isolated from panics. The wrappers here never cancel a task; work that
//! must stop with its caller watches the caller's token itself, as the
//! stream producer does.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Spawn `fut` detached. A panic inside it is logged and swallowed.
pub fn spawn_detached<F>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            error!(task = name, panic = %panic_message(panic.as_ref()), "Background task panicked");
        } else {
            debug!(task = name, "Background task finished");
        }
    })
}

/// Like [`spawn_detached`], but abandons the task after `deadline`.
pub fn spawn_detached_with_timeout<F>(name: &'static str, deadline: Duration, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    spawn_detached(name, async move {
        if tokio::time::timeout(deadline, fut).await.is_err() {
            warn!(task = name, deadline_secs = deadline.as_secs(), "Background task timed out");
        }
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
