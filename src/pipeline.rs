use std::collections::VecDeque;
use std::sync::Mutex;

type Job = Box<dyn FnOnce() + Send>;

/// Per-request FIFO gate for validation and completion closures.
///
/// The pipeline starts held: submissions queue up in order and none run
/// until [`release`](Self::release) is called, which happens exactly once,
/// when the owning delegate reaches its terminal state. After release,
/// submissions run immediately on the submitting thread.
pub(crate) struct CompletionPipeline {
    state: Mutex<PipelineState>,
}

struct PipelineState {
    released: bool,
    pending: VecDeque<Job>,
}

impl CompletionPipeline {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PipelineState {
                released: false,
                pending: VecDeque::new(),
            }),
        }
    }

    /// Submits a closure. Held: queued in FIFO order. Released: runs now.
    pub(crate) fn submit(&self, job: Job) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.released {
                state.pending.push_back(job);
                return;
            }
        }
        job();
    }

    /// Removes the hold and drains queued jobs in submission order.
    ///
    /// Jobs submitted while the drain is running are appended behind the
    /// queued ones and picked up by the same drain, preserving FIFO order;
    /// `released` flips only once the queue is empty. Calling `release`
    /// again is a no-op.
    pub(crate) fn release(&self) {
        loop {
            let job = {
                let mut state = self.state.lock().unwrap();
                match state.pending.pop_front() {
                    Some(job) => job,
                    None => {
                        state.released = true;
                        return;
                    }
                }
            };
            job();
        }
    }

    #[cfg(test)]
    fn is_released(&self) -> bool {
        self.state.lock().unwrap().released
    }
}
