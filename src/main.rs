mod config;
mod dispatcher;
mod executor;
mod github;
mod hooks;
mod http;
mod lock_manager;
mod logs;
mod notifier;
mod reporter;
mod resolver;
mod signature;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use actix::Actor;
use actix_web::{middleware::Logger, web, App, HttpServer};
use color_eyre::eyre::{self, WrapErr as _};

use crate::{
    config::Config,
    dispatcher::{Dispatcher, Pipeline},
    executor::{CommandRunner, Executor, GitCheckout, Settings},
    github::Github,
    logs::{FileLogStore, LogStore, MemoryLogStore},
};

#[actix_web::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();
    color_eyre::install()?;
    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(tracing_subscriber::fmt().finish())?;

    let config = Config::from_env()?;

    let github = Github::start(config.github_token.clone(), config.github_api.clone());
    let notifier = notifier::Notifier::new(notifier::Config {
        slack_webhook: config.slack_webhook.clone(),
        slack_channel: config.slack_channel.clone(),
        public_url: config.public_url.clone(),
    })
    .start();

    let logs: Arc<dyn LogStore> = match &config.log_dir {
        Some(dir) => Arc::new(
            FileLogStore::open(dir)
                .wrap_err_with(|| format!("Failed to open log directory {}", dir.display()))?,
        ),
        None => {
            tracing::warn!("No log directory configured, deployment logs are kept in memory");
            Arc::new(MemoryLogStore::default())
        }
    };

    let executor = Executor::new(
        Settings::from_config(&config),
        Arc::new(GitCheckout::new(config.playbook_branch.clone())),
        Arc::new(CommandRunner),
        Arc::new(github.clone()),
        logs.clone(),
        Arc::new(lock_manager::LockManager::new()),
    );
    let dispatcher = Dispatcher::start(
        config.parallel_jobs as usize,
        Pipeline::new(
            config.repos.clone(),
            Arc::new(github.clone()),
            executor,
            notifier,
        ),
    );

    let webhook_secret = config.webhook_secret.clone();
    tracing::info!("Listening on {}", config.bind);
    HttpServer::new(move || {
        App::new()
            .app_data(http::WebhookConfig::new(webhook_secret.clone()))
            .app_data(web::Data::new(dispatcher.clone()))
            .app_data(web::Data::from(logs.clone()))
            .app_data(web::Data::new(github.clone()))
            .wrap(Logger::default())
            .configure(hooks::configure)
    })
    .bind(&config.bind)?
    .run()
    .await
    .map_err(Into::into)
}
