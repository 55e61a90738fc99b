mod git;
mod process;

use std::{
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use color_eyre::eyre::{self, WrapErr as _};

pub use self::{
    git::{Checkout, GitCheckout},
    process::{CommandRunner, Exit, Invocation, ProcessOutput, ProcessRunner},
};
use crate::{
    config::Config,
    github::{Deployment, Repository, State},
    lock_manager::LockManager,
    logs::{LogKey, LogStore},
    reporter::{NewStatus, StatusReporter},
};

const PLAYBOOK_COMMAND: &str = "ansible-playbook";

const STARTED: &str = "Deploy started";
const SUCCEEDED: &str = "Deploy succeeded";
const FAILED: &str = "Deploy failed";

/// Lines starting with one of these explain why a playbook run failed.
const FAILURE_MARKERS: &[&str] = &["fatal:", "ERROR!"];

#[derive(Debug, Clone)]
pub struct Settings {
    pub playbook_path: PathBuf,
    pub inventory: String,
    pub playbook_args: Vec<String>,
    pub extra_vars: Vec<String>,
    pub timeout: Option<Duration>,
    pub public_url: String,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            playbook_path: config.playbook_path.clone(),
            inventory: config.inventory.clone(),
            playbook_args: config.playbook_args.clone(),
            extra_vars: config.extra_vars.clone(),
            timeout: Some(config.deploy_timeout()).filter(|timeout| !timeout.is_zero()),
            public_url: config.public_url.clone(),
        }
    }
}

#[derive(Debug)]
struct Outcome {
    state: State,
    description: String,
    log: String,
}

impl Outcome {
    fn failed(log: String) -> Self {
        Self {
            state: State::Error,
            description: FAILED.into(),
            log,
        }
    }

    fn from_output(output: ProcessOutput, timeout: Option<Duration>) -> Self {
        if output.success() {
            return Self {
                state: State::Success,
                description: SUCCEEDED.into(),
                log: output.output,
            };
        }

        let ProcessOutput { exit, mut output } = output;
        let description = match exit {
            Exit::TimedOut => {
                let secs = timeout.map_or(0, |timeout| timeout.as_secs());
                output.push_str(&format!(
                    "\n`{}` was killed after {}s\n",
                    PLAYBOOK_COMMAND, secs
                ));
                format!("{}: timed out after {}s", FAILED, secs)
            }
            Exit::Code(_) | Exit::Signal => failure_description(&output),
        };
        Self {
            state: State::Error,
            description,
            log: output,
        }
    }
}

fn failure_description(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .find(|line| FAILURE_MARKERS.iter().any(|marker| line.starts_with(marker)))
        .map_or_else(|| FAILED.to_string(), |line| format!("{}: {}", FAILED, line))
}

fn is_safe_arg(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// Runs the playbook for one deployment and reports its progress.
#[derive(Clone)]
pub struct Executor {
    settings: Arc<Settings>,
    checkout: Arc<dyn Checkout>,
    runner: Arc<dyn ProcessRunner>,
    reporter: Arc<dyn StatusReporter>,
    logs: Arc<dyn LogStore>,
    locks: Arc<LockManager<PathBuf>>,
}

impl Executor {
    pub fn new(
        settings: Settings,
        checkout: Arc<dyn Checkout>,
        runner: Arc<dyn ProcessRunner>,
        reporter: Arc<dyn StatusReporter>,
        logs: Arc<dyn LogStore>,
        locks: Arc<LockManager<PathBuf>>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            checkout,
            runner,
            reporter,
            logs,
            locks,
        }
    }

    /// Deploys `deployment` with the `target` playbook.
    ///
    /// `pending` is reported first and exactly one terminal status follows,
    /// whatever happens in between. Only a failure to report that terminal
    /// status is returned as an error.
    pub fn run(
        &self,
        repository: &Repository,
        deployment: &Deployment,
        target: &str,
    ) -> eyre::Result<State> {
        let key = LogKey::for_repository(repository, deployment.id).ok_or_else(|| {
            eyre::eyre!("Invalid repository name `{}`", repository.full_name)
        })?;

        let pending = NewStatus::new(State::Pending, STARTED, None);
        if let Err(err) = self.reporter.report(&deployment.statuses_url, &pending) {
            tracing::error!("Failed to report pending status: {}", err);
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.deploy(deployment, target)
        })) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                tracing::error!("{:#}", err);
                Outcome::failed(format!("{:#}\n", err))
            }
            Err(_) => {
                tracing::error!("Deploy panicked");
                Outcome::failed("Deploy panicked\n".into())
            }
        };

        if let Err(err) = self.logs.put(&key, &outcome.log) {
            tracing::error!("Failed to store deploy log: {}", err);
        }

        let status = NewStatus::new(
            outcome.state,
            &outcome.description,
            Some(key.url(&self.settings.public_url)),
        );
        self.reporter
            .report(&deployment.statuses_url, &status)
            .wrap_err("Failed to report deploy result")?;
        Ok(outcome.state)
    }

    fn deploy(&self, deployment: &Deployment, target: &str) -> eyre::Result<Outcome> {
        let invocation = self.invocation(deployment, target)?;
        let path = self.settings.playbook_path.clone();

        self.locks.with_lock(path.clone(), || {
            tracing::info!("Acquired lock for {:?}, syncing checkout", path);
            self.checkout
                .sync(&path)
                .wrap_err("Failed to sync playbook checkout")?;

            tracing::info!(
                "Running {}.yml on {} ({})",
                target,
                deployment.environment,
                deployment.sha,
            );
            let output = self
                .runner
                .run(&invocation)
                .wrap_err_with(|| format!("Failed to run `{}`", PLAYBOOK_COMMAND))?;

            let outcome = Outcome::from_output(output, invocation.timeout);
            match outcome.state {
                State::Success => tracing::info!(
                    "Successfully deployed {} to {}",
                    target,
                    deployment.environment
                ),
                _ => tracing::error!(
                    output = outcome.log.as_str(),
                    "`{}` failed: {}",
                    PLAYBOOK_COMMAND,
                    outcome.description,
                ),
            }
            Ok(outcome)
        })
    }

    fn invocation(&self, deployment: &Deployment, target: &str) -> eyre::Result<Invocation> {
        if !is_safe_arg(&deployment.environment) {
            eyre::bail!("Refusing to deploy to environment `{}`", deployment.environment);
        }
        if deployment.sha.is_empty() || !deployment.sha.chars().all(|c| c.is_ascii_hexdigit()) {
            eyre::bail!("Invalid commit sha `{}`", deployment.sha);
        }

        let settings = &self.settings;
        let mut args = settings.playbook_args.clone();
        args.extend([
            "-i".to_string(),
            settings.inventory.clone(),
            "-l".to_string(),
            deployment.environment.clone(),
            format!("{}.yml", target),
            "-e".to_string(),
            format!("commit_hash={}", deployment.sha),
        ]);
        for var in &settings.extra_vars {
            args.push("-e".into());
            args.push(var.clone());
        }

        Ok(Invocation {
            program: PLAYBOOK_COMMAND.into(),
            args,
            current_dir: settings.playbook_path.clone(),
            timeout: settings.timeout,
        })
    }
}
