use std::path::PathBuf;

use crate::cli::Args;
use crate::error::{Error, Result};
use crate::scm::CommitAuthor;

pub const DEFAULT_MESSAGE_TEMPLATE: &str = "fix: update {} to {}";

/// Everything a run needs, resolved once from flags and environment.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub value: String,
    pub config_file: PathBuf,
    pub apply: bool,
    /// `Some` only in CI mode.
    pub git_ref: Option<String>,
    pub token: String,
    pub author: CommitAuthor,
    pub message_template: String,
    pub api_url: String,
}

impl RunContext {
    /// Resolves `GITHUB_TOKEN` and, with `--ci`, `GITHUB_REF`/`GIT_REF`
    /// through `env`.
    pub fn resolve<F>(args: &Args, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| env(key).filter(|value| !value.is_empty());

        let token = non_empty("GITHUB_TOKEN").ok_or_else(|| Error::Auth {
            message: "GITHUB_TOKEN is not set".to_string(),
        })?;

        let git_ref = if args.ci {
            let git_ref = non_empty("GITHUB_REF")
                .or_else(|| non_empty("GIT_REF"))
                .ok_or_else(|| Error::Config {
                    message: "GITHUB_REF is not set (required in --ci mode)".to_string(),
                })?;
            Some(git_ref)
        } else {
            None
        };

        Ok(Self {
            value: args.value.clone(),
            config_file: args.config.clone(),
            apply: args.apply,
            git_ref,
            token,
            author: CommitAuthor {
                name: args.name.clone(),
                email: args.email.clone(),
            },
            message_template: args.message.clone(),
            api_url: args.api.clone(),
        })
    }

    pub fn commit_message(&self, dep_name: &str) -> String {
        render_commit_message(&self.message_template, dep_name, &self.value)
    }
}

/// Fills `{}` slots in order with `dep_name` and `value`; `{0}` and `{1}`
/// address them directly and `{{`/`}}` are literal braces. Unknown slots are
/// left as written.
pub fn render_commit_message(template: &str, dep_name: &str, value: &str) -> String {
    let slots = [dep_name, value];
    let mut out = String::with_capacity(template.len() + dep_name.len() + value.len());
    let mut next_slot = 0;
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            rest = "";
            break;
        };

        let slot = &tail[1..close];
        let index = if slot.is_empty() {
            next_slot += 1;
            Some(next_slot - 1)
        } else {
            slot.parse::<usize>().ok()
        };

        match index.and_then(|i| slots.get(i)) {
            Some(text) => out.push_str(text),
            None => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    out
}
