use std::sync::Arc;

use tracing::debug;
use weft_transport::{
    BodyStream, ResponseHead, ServerTrust, SessionDelegate, TaskEvent, TaskId, TransportRequest,
    TrustDisposition,
};

use crate::engine::TrustPolicy;
use crate::registry::TaskRegistry;

/// The one object the transport session talks to.
///
/// Callbacks for every in-flight task arrive here, interleaved and on
/// arbitrary threads; each is routed by task id to the owning request's
/// delegate. Events for ids with no live owner are dropped.
///
/// A terminal event runs a fixed teardown: the URL index entry goes first
/// (no new caller may join a finished transfer), then the delegate sees the
/// event and opens its completion pipeline, then the id entry goes.
pub(crate) struct SessionMultiplexer {
    registry: Arc<TaskRegistry>,
    trust_policy: Option<Arc<dyn TrustPolicy>>,
}

impl SessionMultiplexer {
    pub(crate) fn new(
        registry: Arc<TaskRegistry>,
        trust_policy: Option<Arc<dyn TrustPolicy>>,
    ) -> Self {
        Self {
            registry,
            trust_policy,
        }
    }
}

impl SessionDelegate for SessionMultiplexer {
    fn task_event(&self, id: TaskId, event: TaskEvent) {
        let Some(request) = self.registry.get(id) else {
            debug!(id = %id, "dropping event for unknown task");
            return;
        };
        match event {
            TaskEvent::BecameDownloadTask(task) => {
                // The replacement task carries a fresh id; rebind the
                // registry before any callback can arrive under it.
                let new_id = task.id();
                self.registry.set(new_id, Some(Arc::downgrade(&request)));
                request.set_task_id(Some(new_id));
                if new_id != id {
                    self.registry.set(id, None);
                }
                request
                    .delegate()
                    .handle_event(TaskEvent::BecameDownloadTask(task));
            }
            terminal @ TaskEvent::Completed { .. } => {
                if let Some(url) = request.url_key() {
                    self.registry.set_by_url(&url, None);
                }
                request.delegate().handle_event(terminal);
                self.registry.set(id, None);
                request.set_task_id(None);
            }
            other => request.delegate().handle_event(other),
        }
    }

    fn redirect(
        &self,
        _id: TaskId,
        _response: &ResponseHead,
        new_request: TransportRequest,
    ) -> Option<TransportRequest> {
        Some(new_request)
    }

    fn challenge(&self, _id: Option<TaskId>, trust: &ServerTrust) -> TrustDisposition {
        match &self.trust_policy {
            Some(policy) => policy.evaluate(&trust.host, trust),
            None => TrustDisposition::Default,
        }
    }

    fn need_body_stream(&self, id: TaskId) -> Option<BodyStream> {
        let request = self.registry.get(id)?;
        request.delegate().open_body_stream()
    }
}
