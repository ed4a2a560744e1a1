//! Fixed-interval polling of cluster conditions.
//!
//! A [`Condition`] is a one-shot observation of cluster state. [`poll_until`]
//! evaluates it immediately and then once per interval until it is satisfied,
//! fails hard, or the timeout elapses.
//!
//! Errors for which [`ConditionError::is_absent`] holds (the target object does
//! not exist yet) are a soft "not yet" and keep the loop going; every other
//! error ends the wait immediately.

pub mod conditions;

use std::time::Duration;

use async_trait::async_trait;
use snafu::Snafu;
use tokio::time::{Instant, sleep_until, timeout_at};

pub use self::conditions::*;

/// Result of a single evaluation of a [`Condition`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation<T = ()> {
    /// The condition holds; polling stops and yields the value.
    Satisfied(T),
    /// The condition does not hold yet. Carries a description of what was
    /// observed, reported if the wait eventually times out.
    Pending(String),
}

impl<T> Observation<T> {
    pub fn pending(state: impl Into<String>) -> Self {
        Self::Pending(state.into())
    }

    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied(_))
    }
}

/// Errors a [`Condition`] may fail with.
pub trait ConditionError: std::error::Error + Send + Sync + 'static {
    /// Whether the error only says the target object is not there yet.
    fn is_absent(&self) -> bool;
}

/// A predicate over observed cluster state.
#[async_trait]
pub trait Condition: Send + Sync {
    /// Value handed back once the condition is satisfied.
    type Output: Send;

    type Error: ConditionError;

    /// Human readable name of what is being waited for.
    fn describe(&self) -> String;

    async fn check(&self) -> Result<Observation<Self::Output>, Self::Error>;
}

/// An error returned by [`poll_until`].
#[derive(Debug, Snafu)]
pub enum PollError<E>
where
    E: ConditionError,
{
    /// The condition failed with an error other than absence.
    #[snafu(display("{} failed: {}", condition, source))]
    Condition { condition: String, source: E },

    /// The condition was never satisfied within the timeout.
    #[snafu(display(
        "timed out after {:?} waiting for {}, last observed: {}",
        timeout,
        condition,
        last_observed
    ))]
    DeadlineExceeded {
        condition: String,
        timeout: Duration,
        last_observed: String,
    },
}

impl<E: ConditionError> PollError<E> {
    pub const fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}

/// Interval and timeout of one wait.
///
/// Callers keep `timeout >= interval`; a shorter timeout still evaluates the
/// condition once and then waits out the deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSpec {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub async fn wait<C>(&self, condition: &C) -> Result<C::Output, PollError<C::Error>>
    where
        C: Condition + ?Sized,
    {
        poll_until(condition, self.interval, self.timeout).await
    }
}

/// Evaluate `condition` now and every `interval` after that until it is
/// satisfied, fails with a non-absence error, or the next evaluation would
/// land past `timeout`.
///
/// Evaluations are strictly sequential and at least `interval` apart. On
/// timeout the call returns once `timeout` has fully elapsed; an evaluation
/// still in flight at the deadline is dropped.
pub async fn poll_until<C>(
    condition: &C,
    interval: Duration,
    timeout: Duration,
) -> Result<C::Output, PollError<C::Error>>
where
    C: Condition + ?Sized,
{
    let description = condition.describe();
    let deadline = Instant::now() + timeout;
    let mut attempts = 0_usize;
    let mut last_observed = String::from("no evaluation completed");

    loop {
        attempts += 1;
        let Ok(result) = timeout_at(deadline, condition.check()).await else {
            warn!(
                message = "Timed out during condition evaluation.",
                condition = %description,
                ?timeout,
                attempts,
            );
            return Err(PollError::DeadlineExceeded {
                condition: description,
                timeout,
                last_observed,
            });
        };
        last_observed = match result {
            Ok(Observation::Satisfied(output)) => {
                debug!(message = "Condition satisfied.", condition = %description, attempts);
                return Ok(output);
            }
            Ok(Observation::Pending(state)) => state,
            Err(error) if error.is_absent() => error.to_string(),
            Err(error) => {
                warn!(message = "Condition failed.", condition = %description, %error, attempts);
                return Err(PollError::Condition {
                    condition: description,
                    source: error,
                });
            }
        };
        debug!(
            message = "Condition not yet satisfied.",
            condition = %description,
            %last_observed,
            attempts,
        );

        let next = Instant::now() + interval;
        if next > deadline {
            sleep_until(deadline).await;
            warn!(
                message = "Timed out waiting for condition.",
                condition = %description,
                ?timeout,
                attempts,
            );
            return Err(PollError::DeadlineExceeded {
                condition: description,
                timeout,
                last_observed,
            });
        }
        sleep_until(next).await;
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use super::*;
    use crate::cluster::QueryError;

    type Step = Result<Observation, QueryError>;

    /// Replays a script of observations, then stays pending forever.
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        evaluations: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into_iter().collect()),
                evaluations: Mutex::new(Vec::new()),
            }
        }

        fn evaluations(&self) -> Vec<Instant> {
            self.evaluations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Condition for Scripted {
        type Output = ();
        type Error = QueryError;

        fn describe(&self) -> String {
            "scripted condition".to_owned()
        }

        async fn check(&self) -> Result<Observation, QueryError> {
            self.evaluations.lock().unwrap().push(Instant::now());
            self.steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Observation::pending("still pending")))
        }
    }

    fn absent() -> Step {
        Err(QueryError::NotFound {
            kind: "Pod",
            name: "w1".to_owned(),
        })
    }

    fn forbidden() -> Step {
        Err(QueryError::Rejected {
            verb: "get",
            kind: "Pod",
            name: "w1".to_owned(),
            code: 403,
            reason: "forbidden".to_owned(),
        })
    }

    const INTERVAL: Duration = Duration::from_secs(1);
    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn satisfied_at_first_evaluation_does_not_sleep() {

        let condition = Scripted::new([Ok(Observation::Satisfied(()))]);
        let start = Instant::now();

        poll_until(&condition, INTERVAL, TIMEOUT).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(condition.evaluations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_satisfied_times_out_within_one_interval_of_the_deadline() {

        let condition = Scripted::new([]);
        let start = Instant::now();

        let error = poll_until(&condition, INTERVAL, TIMEOUT).await.unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= TIMEOUT, "returned early after {elapsed:?}");
        assert!(elapsed <= TIMEOUT + INTERVAL, "returned late after {elapsed:?}");
        match error {
            PollError::DeadlineExceeded {
                condition,
                timeout,
                last_observed,
            } => {
                assert_eq!(condition, "scripted condition");
                assert_eq!(timeout, TIMEOUT);
                assert_eq!(last_observed, "still pending");
            }
            other => panic!("unexpected error: {other}"),
        }
        // 0s, 1s, ..., 5s.
        assert_eq!(condition.evaluations().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn evaluations_are_at_least_one_interval_apart() {

        let condition = Scripted::new([]);
        let _ = poll_until(&condition, INTERVAL, TIMEOUT).await;

        let evaluations = condition.evaluations();
        for pair in evaluations.windows(2) {
            assert!(pair[1] - pair[0] >= INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn absence_keeps_polling() {

        let condition = Scripted::new([absent(), absent(), Ok(Observation::Satisfied(()))]);
        let start = Instant::now();

        poll_until(&condition, INTERVAL, TIMEOUT).await.unwrap();

        assert_eq!(condition.evaluations().len(), 3);
        assert_eq!(start.elapsed(), INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn absence_until_the_deadline_reports_the_absence() {

        let condition = Scripted::new(std::iter::repeat_with(absent).take(10));

        let error = poll_until(&condition, INTERVAL, TIMEOUT).await.unwrap_err();

        match error {
            PollError::DeadlineExceeded { last_observed, .. } => {
                assert_eq!(last_observed, r#"Pod "w1" not found"#);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_abort_immediately() {

        let condition = Scripted::new([Ok(Observation::pending("creating")), forbidden()]);
        let start = Instant::now();

        let error = poll_until(&condition, INTERVAL, TIMEOUT).await.unwrap_err();

        assert!(!error.is_deadline_exceeded());
        assert!(matches!(
            error,
            PollError::Condition {
                source: QueryError::Rejected { code: 403, .. },
                ..
            }
        ));
        assert_eq!(condition.evaluations().len(), 2);
        assert_eq!(start.elapsed(), INTERVAL);
    }

    /// Answers once, then never completes another evaluation.
    struct Stalls {
        evaluations: Mutex<usize>,
    }

    #[async_trait]
    impl Condition for Stalls {
        type Output = ();
        type Error = QueryError;

        fn describe(&self) -> String {
            "stalling condition".to_owned()
        }

        async fn check(&self) -> Result<Observation, QueryError> {
            let first = {
                let mut evaluations = self.evaluations.lock().unwrap();
                *evaluations += 1;
                *evaluations == 1
            };
            if first {
                Ok(Observation::pending("creating"))
            } else {
                std::future::pending().await
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_evaluation_is_cut_off_at_the_deadline() {

        let condition = Stalls {
            evaluations: Mutex::new(0),
        };
        let start = Instant::now();

        let error = poll_until(&condition, INTERVAL, TIMEOUT).await.unwrap_err();

        assert_eq!(start.elapsed(), TIMEOUT);
        assert_eq!(*condition.evaluations.lock().unwrap(), 2);
        match error {
            PollError::DeadlineExceeded { last_observed, .. } => {
                assert_eq!(last_observed, "creating");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_shorter_than_interval_evaluates_once() {

        let condition = Scripted::new([]);
        let start = Instant::now();

        let error = PollSpec::new(Duration::from_secs(10), Duration::from_secs(3))
            .wait(&condition)
            .await
            .unwrap_err();

        assert!(error.is_deadline_exceeded());
        assert_eq!(condition.evaluations().len(), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn independent_waits_run_concurrently() {

        let fast = Scripted::new([Ok(Observation::pending("a")), Ok(Observation::Satisfied(()))]);
        let slow = Scripted::new([]);
        let start = Instant::now();

        let (fast_result, slow_result) = tokio::join!(
            poll_until(&fast, INTERVAL, TIMEOUT),
            poll_until(&slow, INTERVAL, TIMEOUT),
        );

        assert!(fast_result.is_ok());
        assert!(slow_result.unwrap_err().is_deadline_exceeded());
        assert_eq!(fast.evaluations().len(), 2);
        assert_eq!(start.elapsed(), TIMEOUT);
    }
}
