use clap::Parser;
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::context::DEFAULT_MESSAGE_TEMPLATE;
use crate::scm::github::DEFAULT_API_URL;

/// Marker-based value replacer for GitOps repositories.
///
/// Looks for `# gitops-replacer: <depName>` comments in the configured files
/// and sets the value on the line below to VALUE. Runs as a dry run unless
/// `--apply` is given. Requires GITHUB_TOKEN.
#[derive(Parser, Debug, Clone)]
#[command(name = "gitops-replacer", version)]
pub struct Args {
    /// Value to set at the marked locations
    #[arg(value_name = "VALUE")]
    pub value: String,

    /// Configuration file (JSON if it ends in .json, YAML otherwise)
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Commit the changes; without it the run only reports what would change
    #[arg(long)]
    pub apply: bool,

    /// Filter targets by their `when`/`except` patterns against GITHUB_REF
    /// (or GIT_REF)
    #[arg(long)]
    pub ci: bool,

    /// Committer name
    #[arg(long, value_name = "NAME", env = "GIT_COMMIT_NAME", default_value = "Replacer Bot")]
    pub name: String,

    /// Committer email
    #[arg(
        long,
        value_name = "EMAIL",
        env = "GIT_COMMIT_EMAIL",
        default_value = "replacer-bot@localhost.localdomain"
    )]
    pub email: String,

    /// Commit message template; `{}` slots take the depName, then the value
    #[arg(long, value_name = "TEMPLATE", default_value = DEFAULT_MESSAGE_TEMPLATE)]
    pub message: String,

    /// Base URL of the GitHub API
    #[arg(long, value_name = "URL", env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    pub api: String,

    /// Log debug output, including the full original and desired file
    /// contents (may expose secrets)
    #[arg(long)]
    pub verbose: bool,
}
