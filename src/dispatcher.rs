use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use actix::{dev::SendError, prelude::*};
use color_eyre::eyre::{self, WrapErr as _};

use crate::{
    config::RepoMap,
    executor::Executor,
    github::{DeploymentEvent, DeploymentStatusEvent, PushEvent},
    notifier::{Notification, Notifier},
    resolver::{self, DeploymentCreator},
};

/// Jobs accepted but not finished yet, per worker.
const QUEUE_PER_WORKER: usize = 16;

#[derive(Debug, Message)]
#[rtype(result = "()")]
pub enum Job {
    CreateDeployment(PushEvent),
    RunDeploy(DeploymentEvent),
    Notify(DeploymentStatusEvent),
}

impl Job {
    fn span(&self) -> tracing::Span {
        match self {
            Job::CreateDeployment(event) => tracing::info_span!(
                "create_deployment",
                repo = event.repository.full_name.as_str(),
                reference = event.reference.as_str(),
                sha = event.after.as_str(),
            ),
            Job::RunDeploy(event) => tracing::info_span!(
                "deploy",
                repo = event.repository.full_name.as_str(),
                environment = event.deployment.environment.as_str(),
                deployment = event.deployment.id,
                sha = event.deployment.sha.as_str(),
            ),
            Job::Notify(event) => tracing::info_span!(
                "notify",
                repo = event.repository.full_name.as_str(),
                deployment = event.deployment.id,
                state = event.deployment_status.state.as_str(),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("job queue is full")]
    Full,
    #[error("job queue is closed")]
    Closed,
}

/// Everything a worker needs to carry out jobs.
pub struct Pipeline {
    pub repos: RepoMap,
    pub deployments: Arc<dyn DeploymentCreator>,
    pub executor: Executor,
    pub notifier: Recipient<Notification>,
}

impl Pipeline {
    pub fn new(
        repos: RepoMap,
        deployments: Arc<dyn DeploymentCreator>,
        executor: Executor,
        notifier: Addr<Notifier>,
    ) -> Self {
        Self {
            repos,
            deployments,
            executor,
            notifier: notifier.recipient(),
        }
    }

    fn process(&self, job: Job) -> eyre::Result<()> {
        match job {
            Job::CreateDeployment(event) => {
                resolver::request_deployment(&event, self.deployments.as_ref())
                    .wrap_err("Failed to create deployment")?;
            }
            Job::RunDeploy(event) => {
                let target = match self.repos.target(&event.repository.full_name) {
                    Some(target) => target,
                    None => {
                        tracing::debug!(
                            "{} has no playbook, skipping",
                            event.repository.full_name
                        );
                        return Ok(());
                    }
                };
                let state = self
                    .executor
                    .run(&event.repository, &event.deployment, target)?;
                tracing::info!("Deployment finished with {}", state.as_str());
            }
            Job::Notify(event) => {
                futures::executor::block_on(self.notifier.send(Notification::new(event)))
                    .wrap_err("Notifier is unavailable")?
                    .wrap_err("Failed to send notification")?;
            }
        }
        Ok(())
    }
}

struct Worker {
    pipeline: Arc<Pipeline>,
    in_flight: Arc<AtomicUsize>,
}

impl Actor for Worker {
    type Context = SyncContext<Self>;
}

impl Handler<Job> for Worker {
    type Result = ();

    fn handle(&mut self, job: Job, _ctx: &mut Self::Context) -> Self::Result {
        let span = job.span();
        let _guard = span.enter();

        match panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.process(job))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!("Job failed: {:#}", err),
            Err(_) => tracing::error!("Job panicked"),
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Queues jobs for a fixed pool of worker threads.
#[derive(Clone)]
pub struct Dispatcher {
    workers: Addr<Worker>,
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
}

impl Dispatcher {
    pub fn start(threads: usize, pipeline: Pipeline) -> Self {
        let pipeline = Arc::new(pipeline);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let counter = in_flight.clone();
        let workers = SyncArbiter::start(threads, move || Worker {
            pipeline: pipeline.clone(),
            in_flight: counter.clone(),
        });
        Self {
            workers,
            in_flight,
            capacity: threads * QUEUE_PER_WORKER,
        }
    }

    /// Enqueues `job` without waiting; fails if the queue is full.
    pub fn submit(&self, job: Job) -> Result<(), DispatchError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) >= self.capacity {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::Full);
        }
        self.workers.try_send(job).map_err(|err| {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match err {
                SendError::Full(_) => DispatchError::Full,
                SendError::Closed(_) => DispatchError::Closed,
            }
        })
    }
}
