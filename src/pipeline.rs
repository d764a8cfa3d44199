use log::{debug, error, info};
use serde::Serialize;
use std::collections::HashMap;

use crate::ci_gate::{self, GateDecision};
use crate::config::TargetDescriptor;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::file_updater::{check_marked_value, replace_marked_value, Replacement};
use crate::scm::{CommitRequest, ContentStore, FetchedFile, FileLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Validating,
    Prechecking,
    Replacing,
    Committing,
    Reporting,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Validating => "validating",
            Phase::Prechecking => "prechecking",
            Phase::Replacing => "replacing",
            Phase::Committing => "committing",
            Phase::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    /// Filtered out by the CI gate.
    Skipped { reason: String },
    /// Precheck failed for another target, so this one was left alone.
    NotProcessed,
    Unchanged { value: String },
    /// Dry run: the change that `--apply` would commit.
    WouldChange { old_value: String, new_value: String },
    Committed {
        old_value: String,
        new_value: String,
        commit_sha: String,
        html_url: Option<String>,
    },
    Failed { phase: Phase, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub repository: String,
    pub branch: String,
    pub file: String,
    pub dep_name: String,
    #[serde(flatten)]
    pub status: TargetStatus,
}

impl TargetReport {
    fn new(target: &TargetDescriptor, status: TargetStatus) -> Self {
        Self {
            repository: target.repository.clone(),
            branch: target.branch.clone(),
            file: target.file.clone(),
            dep_name: target.dep_name.clone(),
            status,
        }
    }

    pub fn location(&self) -> FileLocation {
        FileLocation::new(&self.repository, &self.branch, &self.file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub value: String,
    pub applied: bool,
    /// The phase that aborted the run or produced a per-target failure.
    pub failed_phase: Option<Phase>,
    pub targets: Vec<TargetReport>,
}

impl RunOutcome {
    pub fn empty(context: &RunContext) -> Self {
        Self {
            value: context.value.clone(),
            applied: context.apply,
            failed_phase: None,
            targets: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.failed_phase.is_none() && self.failed() == 0
    }

    pub fn exit_code(&self) -> u8 {
        if self.success() {
            0
        } else {
            1
        }
    }

    fn count(&self, predicate: impl Fn(&TargetStatus) -> bool) -> usize {
        self.targets.iter().filter(|t| predicate(&t.status)).count()
    }

    pub fn changed(&self) -> usize {
        self.count(|s| {
            matches!(
                s,
                TargetStatus::WouldChange { .. } | TargetStatus::Committed { .. }
            )
        })
    }

    pub fn committed(&self) -> usize {
        self.count(|s| matches!(s, TargetStatus::Committed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TargetStatus::Failed { .. }))
    }
}

/// Files fetched during one run, keyed by repository, branch and path.
#[derive(Debug, Default)]
pub struct FetchCache {
    files: HashMap<FileLocation, FetchedFile>,
}

impl FetchCache {
    pub fn get(&self, location: &FileLocation) -> Option<&FetchedFile> {
        self.files.get(location)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub async fn get_or_fetch<S: ContentStore>(
        &mut self,
        store: &S,
        location: &FileLocation,
    ) -> Result<&FetchedFile> {
        if self.files.contains_key(location) {
            info!("using cached data for {}", location);
        } else {
            let file = store.fetch_file(location).await?;
            self.files.insert(location.clone(), file);
        }
        Ok(&self.files[location])
    }
}

/// A computed replacement waiting for the commit phase.
struct Planned {
    index: usize,
    location: FileLocation,
    replacement: Replacement,
}

pub struct Pipeline<'a, S: ContentStore> {
    store: &'a S,
    context: &'a RunContext,
    cache: FetchCache,
}

impl<'a, S: ContentStore> Pipeline<'a, S> {
    pub fn new(store: &'a S, context: &'a RunContext) -> Self {
        Self {
            store,
            context,
            cache: FetchCache::default(),
        }
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    pub async fn run(&mut self, targets: &[TargetDescriptor]) -> RunOutcome {
        let mut statuses: Vec<Option<TargetStatus>> = vec![None; targets.len()];
        let active = self.select_active(targets, &mut statuses);

        debug!("phase: {}", Phase::Prechecking);
        let failures = self.precheck(targets, &active).await;
        if !failures.is_empty() {
            error!(
                "precheck failed for {} target(s), no changes will be made",
                failures.len()
            );
            for (index, error) in failures {
                statuses[index] = Some(TargetStatus::Failed {
                    phase: Phase::Prechecking,
                    reason: error.to_string(),
                });
            }
            return self.finish(targets, statuses, Some(Phase::Prechecking));
        }

        debug!("phase: {}", Phase::Replacing);
        let plans = self.replace(targets, &active, &mut statuses);

        if self.context.apply {
            debug!("phase: {}", Phase::Committing);
            self.commit(targets, plans, &mut statuses).await;
        } else {
            for plan in plans {
                statuses[plan.index] = Some(unapplied_status(&plan.replacement, &self.context.value));
            }
        }

        let failed_phase = statuses.iter().find_map(|status| match status {
            Some(TargetStatus::Failed { phase, .. }) => Some(*phase),
            _ => None,
        });
        self.finish(targets, statuses, failed_phase)
    }

    fn select_active(
        &self,
        targets: &[TargetDescriptor],
        statuses: &mut [Option<TargetStatus>],
    ) -> Vec<usize> {
        let git_ref = self.context.git_ref.as_deref();
        let mut active = Vec::with_capacity(targets.len());

        for (index, target) in targets.iter().enumerate() {
            let decision = ci_gate::evaluate(target.when.as_ref(), target.except.as_ref(), git_ref);
            match decision {
                GateDecision::Active => {
                    if let Some(git_ref) = git_ref {
                        debug!("git-ref {} selects '{}' in {}", git_ref, target.dep_name, target.location());
                    }
                    active.push(index);
                }
                skipped => {
                    info!(
                        "skip '{}' in {}: {}",
                        target.dep_name,
                        target.location(),
                        skipped
                    );
                    statuses[index] = Some(TargetStatus::Skipped {
                        reason: skipped.to_string(),
                    });
                }
            }
        }

        active
    }

    async fn precheck(&mut self, targets: &[TargetDescriptor], active: &[usize]) -> Vec<(usize, Error)> {
        let mut failures = Vec::new();

        for &index in active {
            let target = &targets[index];
            let location = target.location();
            info!(
                "validate if {} from repository {} in branch {} exists",
                target.file, target.repository, target.branch
            );

            let checked = match self.cache.get_or_fetch(self.store, &location).await {
                Ok(file) => check_marked_value(&file.content, &target.dep_name),
                Err(e) => Err(e),
            };

            match checked {
                Ok(value) => info!("depName '{}' - current value: {}", target.dep_name, value),
                Err(e) => {
                    error!("{}: {}", location, e);
                    failures.push((index, e));
                }
            }
        }

        failures
    }

    // targets sharing a file see each other's edits
    fn replace(
        &self,
        targets: &[TargetDescriptor],
        active: &[usize],
        statuses: &mut [Option<TargetStatus>],
    ) -> Vec<Planned> {
        let value = &self.context.value;
        let mut working: HashMap<FileLocation, String> = HashMap::new();
        let mut plans = Vec::with_capacity(active.len());

        for &index in active {
            let target = &targets[index];
            let location = target.location();

            let content = match working.get(&location) {
                Some(content) => content.clone(),
                None => match self.cache.get(&location) {
                    Some(file) => file.content.clone(),
                    None => {
                        statuses[index] = Some(TargetStatus::Failed {
                            phase: Phase::Replacing,
                            reason: format!("{} was not fetched", location),
                        });
                        continue;
                    }
                },
            };

            let replacement = match replace_marked_value(&content, &target.dep_name, value) {
                Ok(replacement) => replacement,
                Err(e) => {
                    error!("{}: {}", location, e);
                    statuses[index] = Some(TargetStatus::Failed {
                        phase: Phase::Replacing,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            debug!("#### BEGIN OF SOURCE FILE {} ####\n{}", target.file, content);
            if replacement.changed {
                info!("depName '{}' - new value: {}", target.dep_name, value);
                debug!(
                    "#### BEGIN OF DESIRED FILE {} ####\n{}",
                    target.file, replacement.content
                );
                working.insert(location.clone(), replacement.content.clone());
            } else {
                info!(
                    "no outstanding changes for depName '{}' in file {}",
                    target.dep_name, target.file
                );
            }

            plans.push(Planned {
                index,
                location,
                replacement,
            });
        }

        plans
    }

    async fn commit(
        &self,
        targets: &[TargetDescriptor],
        plans: Vec<Planned>,
        statuses: &mut [Option<TargetStatus>],
    ) {
        let value = &self.context.value;
        // last committed (content, blob sha) per file
        let mut landed: HashMap<FileLocation, (String, String)> = HashMap::new();

        for plan in plans {
            let Planned {
                index,
                location,
                replacement,
            } = plan;
            let target = &targets[index];

            if !replacement.changed {
                statuses[index] = Some(unapplied_status(&replacement, value));
                continue;
            }

            let (base, prior_sha) = match landed.get(&location) {
                Some(known) => known.clone(),
                None => match self.cache.get(&location) {
                    Some(file) => (file.content.clone(), file.sha.clone()),
                    None => {
                        statuses[index] = Some(TargetStatus::Failed {
                            phase: Phase::Committing,
                            reason: format!("{} was not fetched", location),
                        });
                        continue;
                    }
                },
            };

            let replacement = match replace_marked_value(&base, &target.dep_name, value) {
                Ok(replacement) => replacement,
                Err(e) => {
                    error!("{}: {}", location, e);
                    statuses[index] = Some(TargetStatus::Failed {
                        phase: Phase::Committing,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if !replacement.changed {
                statuses[index] = Some(unapplied_status(&replacement, value));
                continue;
            }

            info!(
                "update {} from repository {} in branch {}",
                target.file, target.repository, target.branch
            );
            let message = self.context.commit_message(&target.dep_name);
            let request = CommitRequest {
                location: &location,
                content: &replacement.content,
                prior_sha: &prior_sha,
                message: &message,
                author: &self.context.author,
            };

            match self.store.commit_file(&request).await {
                Ok(info) => {
                    info!("committed {} for '{}' as {}", location, target.dep_name, info.commit_sha);
                    statuses[index] = Some(TargetStatus::Committed {
                        old_value: replacement.old_value.clone(),
                        new_value: value.clone(),
                        commit_sha: info.commit_sha,
                        html_url: info.html_url,
                    });
                    landed.insert(location, (replacement.content, info.content_sha));
                }
                Err(e) => {
                    error!("commit of {} for '{}' failed: {}", location, target.dep_name, e);
                    statuses[index] = Some(TargetStatus::Failed {
                        phase: Phase::Committing,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn finish(
        &self,
        targets: &[TargetDescriptor],
        statuses: Vec<Option<TargetStatus>>,
        failed_phase: Option<Phase>,
    ) -> RunOutcome {
        debug!("phase: {}", Phase::Reporting);
        let targets = targets
            .iter()
            .zip(statuses)
            .map(|(target, status)| {
                TargetReport::new(target, status.unwrap_or(TargetStatus::NotProcessed))
            })
            .collect();

        RunOutcome {
            value: self.context.value.clone(),
            applied: self.context.apply,
            failed_phase,
            targets,
        }
    }
}

fn unapplied_status(replacement: &Replacement, value: &str) -> TargetStatus {
    if replacement.changed {
        TargetStatus::WouldChange {
            old_value: replacement.old_value.clone(),
            new_value: value.to_string(),
        }
    } else {
        TargetStatus::Unchanged {
            value: replacement.old_value.clone(),
        }
    }
}
