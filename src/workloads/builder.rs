//! Submit a workload, wait for its pod to terminate and judge its output.

use std::time::Duration;

use snafu::Snafu;

use super::{SuccessCriteriaError, ValidationError, Workload};
use crate::{
    cluster::{Cluster, PodLogs, QueryError},
    params,
    wait::{PodTerminal, PollError, PollSpec, TerminalPhase},
};

/// Why a workload run did not pass.
#[derive(Debug, Snafu)]
pub enum WorkloadError {
    #[snafu(display("invalid workload: {}", source))]
    Validation { source: ValidationError },

    #[snafu(display("unable to submit pod {}/{}: {}", namespace, name, source))]
    Submission {
        namespace: String,
        name: String,
        source: QueryError,
    },

    #[snafu(display("workload must be created before waiting on it"))]
    NotSubmitted,

    #[snafu(display(
        "pod {}/{} did not terminate within {:?}, last observed: {}",
        namespace,
        name,
        timeout,
        last_observed
    ))]
    Timeout {
        namespace: String,
        name: String,
        timeout: Duration,
        last_observed: String,
    },

    #[snafu(display("unable to observe pod {}/{}: {}", namespace, name, source))]
    Poll {
        namespace: String,
        name: String,
        source: QueryError,
    },

    #[snafu(display("pod {}/{} terminated in phase Failed", namespace, name))]
    PodFailed { namespace: String, name: String },

    #[snafu(display(
        "unable to fetch logs of {}/{} container {:?}: {}",
        namespace,
        name,
        container,
        source
    ))]
    Logs {
        namespace: String,
        name: String,
        container: String,
        source: QueryError,
    },

    #[snafu(display("pod {}/{} ran but did not pass: {}", namespace, name, source))]
    SuccessCriteria {
        namespace: String,
        name: String,
        source: SuccessCriteriaError,
    },
}

/// Lifecycle of one workload run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadState {
    Unsubmitted,
    Submitted,
    /// The pod succeeded and its output met the workload's criteria.
    Succeeded,
    /// The pod failed, could not be observed, or ran without passing.
    Failed,
    TimedOut,
    SubmissionFailed,
}

impl WorkloadState {
    /// No further operation changes the verdict.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Unsubmitted | Self::Submitted)
    }
}

#[derive(Debug)]
struct Submission {
    name: String,
    container: String,
}

/// Drives one [`Workload`] through create, wait and output validation.
///
/// The outcome of every step lands in a single error slot read with
/// [`WorkloadBuilder::error`]. Nothing is retried: once a step fails the
/// builder is spent and a new one is needed to try again.
///
/// ```ignore
/// let mut run = WorkloadBuilder::new(&cluster, "test-gpu-burn", burn);
/// run.create().await.wait_until_success(timeout).await;
/// assert!(run.error().is_none());
/// ```
#[derive(Debug)]
pub struct WorkloadBuilder<'a, C: ?Sized, W> {
    cluster: &'a C,
    namespace: String,
    workload: W,
    poll_interval: Duration,
    submission: Option<Submission>,
    state: WorkloadState,
    phase: Option<TerminalPhase>,
    error: Option<WorkloadError>,
}

impl<'a, C, W> WorkloadBuilder<'a, C, W>
where
    C: Cluster + PodLogs + ?Sized,
    W: Workload,
{
    pub fn new(cluster: &'a C, namespace: impl Into<String>, workload: W) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            workload,
            poll_interval: params::DEFAULT_POLL_INTERVAL,
            submission: None,
            state: WorkloadState::Unsubmitted,
            phase: None,
            error: None,
        }
    }

    /// Interval between pod phase checks while waiting.
    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }

    /// Build the pod and submit it. Only acts on an unsubmitted builder.
    pub async fn create(&mut self) -> &mut Self {
        if self.state != WorkloadState::Unsubmitted {
            warn!(message = "Workload already created.", state = ?self.state);
            return self;
        }

        let pod = match self.workload.build_spec() {
            Ok(pod) => pod,
            Err(source) => return self.submission_failed(WorkloadError::Validation { source }),
        };
        let name = pod.metadata.name.clone().unwrap_or_default();
        let container = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.first())
            .map(|container| container.name.clone());
        let Some(container) = container else {
            return self.submission_failed(WorkloadError::Validation {
                source: ValidationError::MissingContainer,
            });
        };

        match self.cluster.create_pod(&self.namespace, &pod).await {
            Ok(_) => {
                info!(
                    message = "Submitted workload pod.",
                    namespace = %self.namespace,
                    %name,
                );
                self.submission = Some(Submission { name, container });
                self.state = WorkloadState::Submitted;
            }
            Err(source) => {
                let namespace = self.namespace.clone();
                return self.submission_failed(WorkloadError::Submission {
                    namespace,
                    name,
                    source,
                });
            }
        }
        self
    }

    fn submission_failed(&mut self, error: WorkloadError) -> &mut Self {
        error!(message = "Workload submission failed.", %error);
        self.state = WorkloadState::SubmissionFailed;
        self.error = Some(error);
        self
    }

    /// Wait up to `timeout` for the pod to terminate, then check its output.
    ///
    /// A failed pod is reported without looking at its logs. Calling this on
    /// a builder that never submitted a pod records
    /// [`WorkloadError::NotSubmitted`] and ends the builder; on a finished run
    /// it does nothing.
    pub async fn wait_until_success(&mut self, timeout: Duration) -> &mut Self {
        let (name, container) = match (&self.state, &self.submission) {
            (WorkloadState::Submitted, Some(submission)) => {
                (submission.name.clone(), submission.container.clone())
            }
            (WorkloadState::Unsubmitted, _) => {
                // Misuse spends the builder like a failed submission would.
                self.state = WorkloadState::SubmissionFailed;
                self.error = Some(WorkloadError::NotSubmitted);
                return self;
            }
            (state, _) => {
                debug!(message = "Workload already finished.", ?state);
                return self;
            }
        };
        let namespace = self.namespace.clone();

        let condition = PodTerminal::new(self.cluster, namespace.as_str(), name.as_str());
        let phase = match PollSpec::new(self.poll_interval, timeout)
            .wait(&condition)
            .await
        {
            Ok(phase) => phase,
            Err(PollError::DeadlineExceeded {
                timeout,
                last_observed,
                ..
            }) => {
                return self.finish(
                    WorkloadState::TimedOut,
                    Some(WorkloadError::Timeout {
                        namespace,
                        name,
                        timeout,
                        last_observed,
                    }),
                );
            }
            Err(PollError::Condition { source, .. }) => {
                return self.finish(
                    WorkloadState::Failed,
                    Some(WorkloadError::Poll {
                        namespace,
                        name,
                        source,
                    }),
                );
            }
        };
        self.phase = Some(phase);

        if phase == TerminalPhase::Failed {
            return self.finish(
                WorkloadState::Failed,
                Some(WorkloadError::PodFailed { namespace, name }),
            );
        }

        let logs = match self.cluster.logs(&namespace, &name, &container).await {
            Ok(logs) => logs,
            Err(source) => {
                return self.finish(
                    WorkloadState::Failed,
                    Some(WorkloadError::Logs {
                        namespace,
                        name,
                        container,
                        source,
                    }),
                );
            }
        };

        match self.workload.check_success(&logs) {
            Ok(()) => self.finish(WorkloadState::Succeeded, None),
            Err(source) => self.finish(
                WorkloadState::Failed,
                Some(WorkloadError::SuccessCriteria {
                    namespace,
                    name,
                    source,
                }),
            ),
        }
    }

    fn finish(&mut self, state: WorkloadState, error: Option<WorkloadError>) -> &mut Self {
        match &error {
            None => info!(
                message = "Workload passed.",
                namespace = %self.namespace,
                ?state,
            ),
            Some(error) => warn!(
                message = "Workload did not pass.",
                namespace = %self.namespace,
                ?state,
                %error,
            ),
        }
        self.state = state;
        if error.is_some() {
            self.error = error;
        }
        self
    }

    /// Remove the submitted pod. A pod that is already gone counts as
    /// removed, and an unsubmitted builder has nothing to remove.
    pub async fn delete(&self) -> Result<(), QueryError> {
        let Some(submission) = &self.submission else {
            return Ok(());
        };
        match self
            .cluster
            .delete_pod(&self.namespace, &submission.name)
            .await
        {
            Ok(()) => {
                debug!(
                    message = "Deleted workload pod.",
                    namespace = %self.namespace,
                    name = %submission.name,
                );
                Ok(())
            }
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error),
        }
    }
}

impl<C: ?Sized, W> WorkloadBuilder<'_, C, W> {
    /// The verdict so far: `None` when every step invoked up to now succeeded.
    pub const fn error(&self) -> Option<&WorkloadError> {
        self.error.as_ref()
    }

    /// Consume the builder, keeping only its verdict.
    pub fn into_error(self) -> Option<WorkloadError> {
        self.error
    }

    pub const fn state(&self) -> WorkloadState {
        self.state
    }

    /// Terminal pod phase, once observed.
    pub const fn phase(&self) -> Option<TerminalPhase> {
        self.phase
    }

    pub const fn workload(&self) -> &W {
        &self.workload
    }

    /// Name of the submitted pod.
    pub fn pod_name(&self) -> Option<&str> {
        self.submission
            .as_ref()
            .map(|submission| submission.name.as_str())
    }
}
