pub mod ci_gate;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod file_updater;
pub mod output;
pub mod pipeline;
pub mod scm;

use log::{debug, info};

use crate::cli::Args;
use crate::config::Config;
use crate::context::RunContext;
use crate::error::Result;
use crate::pipeline::{Phase, Pipeline, RunOutcome};
use crate::scm::github::GitHubClient;

pub struct ReplacerApplication {
    context: RunContext,
    /// `None` when the config file has no `gitops-replacer` section.
    config: Option<Config>,
}

impl ReplacerApplication {
    pub fn new(context: RunContext, config: Option<Config>) -> Self {
        Self { context, config }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        let Some(config) = &self.config else {
            info!("no gitops-replacer entry found in config, exiting");
            return Ok(RunOutcome::empty(&self.context));
        };

        info!("run replacer with value '{}'", self.context.value);
        if !self.context.apply {
            info!("running in dry-run, no changes will be applied");
        }

        let client = GitHubClient::new(&self.context.token, &self.context.api_url)?;
        let mut pipeline = Pipeline::new(&client, &self.context);
        Ok(pipeline.run(&config.targets).await)
    }
}

/// Resolves the environment and loads the configuration. Fails without
/// touching the network.
pub fn create_replacer_application(args: &Args) -> Result<ReplacerApplication> {
    debug!("phase: {}", Phase::Validating);
    let context = RunContext::resolve(args, |key| std::env::var(key).ok())?;

    let config = Config::load(&context.config_file)?;
    info!("loaded configuration from {}", context.config_file.display());

    Ok(ReplacerApplication::new(context, config))
}
