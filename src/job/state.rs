use tokio::sync::watch;
use tracing::debug;

/// Lifecycle label of the active job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Preparing,
    /// The growing mux output can already be played while work continues
    Playable,
    Finalizing,
    Ready,
    Error,
}

/// Status plus clamped progress, the single observable unit of job state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: f32,
}

/// Mutable job state shared between the controller, the download progress
/// reporter and the frontend. Progress is only ever written through the
/// clamping setter, so observers never see a value outside `[0, 100]`.
#[derive(Debug, Clone)]
pub struct VideoJobState {
    tx: watch::Sender<JobSnapshot>,
}

impl VideoJobState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(JobSnapshot {
            status: JobStatus::Idle,
            progress: 0.0,
        });
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        *self.tx.borrow()
    }

    pub fn status(&self) -> JobStatus {
        self.tx.borrow().status
    }

    pub fn progress(&self) -> f32 {
        self.tx.borrow().progress
    }

    /// Enter Preparing and reset progress
    pub fn preparing(&self) {
        self.set(JobStatus::Preparing, Some(0.0));
    }

    /// Enter Playable, keeping the current progress value
    pub fn playable(&self) {
        self.set(JobStatus::Playable, None);
    }

    /// Enter Finalizing and reset progress for the mux phase
    pub fn finalizing(&self) {
        self.set(JobStatus::Finalizing, Some(0.0));
    }

    /// Enter Ready; progress snaps to 100
    pub fn ready(&self) {
        self.set(JobStatus::Ready, Some(100.0));
    }

    /// Enter Error, preserving the progress value at the time of failure
    pub fn error(&self) {
        self.set(JobStatus::Error, None);
    }

    /// Return to Idle
    pub fn reset(&self) {
        self.set(JobStatus::Idle, Some(0.0));
    }

    pub fn update_progress(&self, value: f32) {
        self.tx.send_modify(|s| s.progress = value.clamp(0.0, 100.0));
    }

    fn set(&self, status: JobStatus, progress: Option<f32>) {
        debug!("Job status -> {:?}", status);
        self.tx.send_modify(|s| {
            s.status = status;
            if let Some(p) = progress {
                s.progress = p.clamp(0.0, 100.0);
            }
        });
    }
}

impl Default for VideoJobState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preparing_resets_progress() {
        let state = VideoJobState::new();
        state.update_progress(25.0);

        state.preparing();

        assert_eq!(state.status(), JobStatus::Preparing);
        assert_eq!(state.progress(), 0.0);
    }

    #[test]
    fn playable_keeps_progress() {
        let state = VideoJobState::new();
        state.update_progress(25.0);

        state.playable();

        assert_eq!(state.status(), JobStatus::Playable);
        assert_eq!(state.progress(), 25.0);
    }

    #[test]
    fn finalizing_resets_progress() {
        let state = VideoJobState::new();
        state.update_progress(25.0);

        state.finalizing();

        assert_eq!(state.status(), JobStatus::Finalizing);
        assert_eq!(state.progress(), 0.0);
    }

    #[test]
    fn ready_forces_full_progress() {
        let state = VideoJobState::new();
        state.update_progress(25.0);

        state.ready();

        assert_eq!(state.status(), JobStatus::Ready);
        assert_eq!(state.progress(), 100.0);
    }

    #[test]
    fn error_keeps_progress() {
        let state = VideoJobState::new();
        state.update_progress(25.0);

        state.error();

        assert_eq!(state.status(), JobStatus::Error);
        assert_eq!(state.progress(), 25.0);
    }

    #[test]
    fn progress_updates_are_visible() {
        let state = VideoJobState::new();
        assert_eq!(state.progress(), 0.0);

        state.update_progress(25.0);

        assert_eq!(state.progress(), 25.0);
    }

    #[test]
    fn progress_cannot_be_negative() {
        let state = VideoJobState::new();

        state.update_progress(-5.0);

        assert_eq!(state.progress(), 0.0);
    }

    #[test]
    fn progress_cannot_exceed_hundred() {
        let state = VideoJobState::new();

        state.update_progress(150.0);

        assert_eq!(state.progress(), 100.0);
    }

    #[tokio::test]
    async fn watchers_observe_transitions() {
        let state = VideoJobState::new();
        let mut rx = state.subscribe();

        state.preparing();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, JobStatus::Preparing);
    }
}
