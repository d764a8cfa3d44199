use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use gitops_replacer::ci_gate::RefPattern;
use gitops_replacer::config::TargetDescriptor;
use gitops_replacer::context::RunContext;
use gitops_replacer::error::{Error, Result};
use gitops_replacer::pipeline::{Phase, Pipeline, TargetStatus};
use gitops_replacer::scm::{
    CommitAuthor, CommitInfo, CommitRequest, ContentStore, FetchedFile, FileLocation,
};

#[derive(Debug, Clone)]
struct RecordedCommit {
    location: FileLocation,
    content: String,
    prior_sha: String,
    message: String,
    author: CommitAuthor,
}

/// In-memory contents API with optimistic concurrency on the blob SHA.
#[derive(Default)]
struct FakeStore {
    files: RefCell<HashMap<FileLocation, (String, String)>>,
    fetches: RefCell<Vec<FileLocation>>,
    commits: RefCell<Vec<RecordedCommit>>,
    rejected: HashSet<FileLocation>,
    unavailable: HashSet<String>,
}

impl FakeStore {
    fn with_file(self, location: &FileLocation, content: &str) -> Self {
        self.files.borrow_mut().insert(
            location.clone(),
            (content.to_string(), format!("sha-{}", location.path)),
        );
        self
    }

    fn rejecting(mut self, location: &FileLocation) -> Self {
        self.rejected.insert(location.clone());
        self
    }

    /// Commits with this message fail before anything is written.
    fn unavailable_for(mut self, message: &str) -> Self {
        self.unavailable.insert(message.to_string());
        self
    }

    fn content(&self, location: &FileLocation) -> String {
        self.files.borrow()[location].0.clone()
    }

    fn commit_count(&self) -> usize {
        self.commits.borrow().len()
    }
}

impl ContentStore for FakeStore {
    async fn fetch_file(&self, location: &FileLocation) -> Result<FetchedFile> {
        self.fetches.borrow_mut().push(location.clone());
        match self.files.borrow().get(location) {
            Some((content, sha)) => Ok(FetchedFile {
                location: location.clone(),
                content: content.clone(),
                sha: sha.clone(),
            }),
            None => Err(Error::NotFound {
                target: location.to_string(),
            }),
        }
    }

    async fn commit_file(&self, request: &CommitRequest<'_>) -> Result<CommitInfo> {
        let number = self.commits.borrow().len() + 1;
        self.commits.borrow_mut().push(RecordedCommit {
            location: request.location.clone(),
            content: request.content.to_string(),
            prior_sha: request.prior_sha.to_string(),
            message: request.message.to_string(),
            author: request.author.clone(),
        });

        let conflict = || Error::Conflict {
            target: request.location.to_string(),
        };
        if self.rejected.contains(request.location) {
            return Err(conflict());
        }
        if self.unavailable.contains(request.message) {
            return Err(Error::Transient {
                attempts: 6,
                message: "503 Service Unavailable".to_string(),
            });
        }

        let mut files = self.files.borrow_mut();
        let entry = files.get_mut(request.location).ok_or_else(conflict)?;
        if entry.1 != request.prior_sha {
            return Err(conflict());
        }

        let new_sha = format!("sha-commit-{}", number);
        *entry = (request.content.to_string(), new_sha.clone());
        Ok(CommitInfo {
            commit_sha: format!("commit-{}", number),
            content_sha: new_sha,
            html_url: None,
        })
    }
}

fn context(value: &str, apply: bool) -> RunContext {
    RunContext {
        value: value.to_string(),
        config_file: "gitops-replacer.json".into(),
        apply,
        git_ref: None,
        token: "token".to_string(),
        author: CommitAuthor {
            name: "Replacer Bot".to_string(),
            email: "replacer-bot@localhost.localdomain".to_string(),
        },
        message_template: "fix: update {} to {}".to_string(),
        api_url: "http://localhost".to_string(),
    }
}

fn target(repository: &str, file: &str, dep_name: &str) -> TargetDescriptor {
    TargetDescriptor {
        repository: repository.to_string(),
        branch: "main".to_string(),
        file: file.to_string(),
        dep_name: dep_name.to_string(),
        when: None,
        except: None,
    }
}

const MYAPP: &str = "# gitops-replacer: myapp\nversion: \"1.0.0\"\n";

#[tokio::test]
async fn test_end_to_end_apply() {
    let myapp = target("acme/deploy", "values.yaml", "myapp");
    let store = FakeStore::default().with_file(&myapp.location(), MYAPP);
    let context = context("2.0.0", true);

    let outcome = Pipeline::new(&store, &context).run(&[myapp.clone()]).await;

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(
        store.content(&myapp.location()),
        "# gitops-replacer: myapp\nversion: \"2.0.0\"\n"
    );

    let commits = store.commits.borrow();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].message, "fix: update myapp to 2.0.0");
    assert_eq!(commits[0].prior_sha, "sha-values.yaml");
    assert_eq!(commits[0].author.name, "Replacer Bot");
    assert_eq!(commits[0].location, myapp.location());
    assert_eq!(
        commits[0].content,
        "# gitops-replacer: myapp\nversion: \"2.0.0\"\n"
    );
    assert_eq!(
        outcome.targets[0].status,
        TargetStatus::Committed {
            old_value: "1.0.0".to_string(),
            new_value: "2.0.0".to_string(),
            commit_sha: "commit-1".to_string(),
            html_url: None,
        }
    );
}

#[tokio::test]
async fn test_dry_run_never_writes() {
    let myapp = target("acme/deploy", "values.yaml", "myapp");
    let store = FakeStore::default().with_file(&myapp.location(), MYAPP);
    let context = context("2.0.0", false);

    let outcome = Pipeline::new(&store, &context).run(&[myapp.clone()]).await;

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(store.commit_count(), 0);
    assert_eq!(store.content(&myapp.location()), MYAPP);
    assert_eq!(
        outcome.targets[0].status,
        TargetStatus::WouldChange {
            old_value: "1.0.0".to_string(),
            new_value: "2.0.0".to_string(),
        }
    );
}

#[tokio::test]
async fn test_precheck_is_all_or_nothing() {
    let first = target("acme/one", "values.yaml", "myapp");
    let missing = target("acme/two", "values.yaml", "myapp");
    let third = target("acme/three", "values.yaml", "myapp");
    let store = FakeStore::default()
        .with_file(&first.location(), MYAPP)
        .with_file(&third.location(), MYAPP);
    let context = context("2.0.0", true);

    let outcome = Pipeline::new(&store, &context)
        .run(&[first.clone(), missing, third.clone()])
        .await;

    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.failed_phase, Some(Phase::Prechecking));
    assert_eq!(store.commit_count(), 0);
    // every target is still checked so all problems get reported
    assert_eq!(store.fetches.borrow().len(), 3);
    assert_eq!(outcome.targets[0].status, TargetStatus::NotProcessed);
    assert!(matches!(
        &outcome.targets[1].status,
        TargetStatus::Failed { phase: Phase::Prechecking, reason } if reason.contains("Not found")
    ));
    assert_eq!(outcome.targets[2].status, TargetStatus::NotProcessed);
    assert_eq!(store.content(&first.location()), MYAPP);
    assert_eq!(store.content(&third.location()), MYAPP);
}

#[tokio::test]
async fn test_missing_marker_aborts_before_commit() {
    let good = target("acme/deploy", "a.yaml", "myapp");
    let unmarked = target("acme/deploy", "b.yaml", "myapp");
    let at_eof = target("acme/deploy", "c.yaml", "myapp");
    let store = FakeStore::default()
        .with_file(&good.location(), MYAPP)
        .with_file(&unmarked.location(), "version: 1.0.0\n")
        .with_file(&at_eof.location(), "version: 1.0.0\n# gitops-replacer: myapp\n");
    let context = context("2.0.0", true);

    let outcome = Pipeline::new(&store, &context)
        .run(&[good, unmarked, at_eof])
        .await;

    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(store.commit_count(), 0);
    assert!(matches!(
        &outcome.targets[1].status,
        TargetStatus::Failed { reason, .. } if reason.contains("No marker")
    ));
    assert!(matches!(
        &outcome.targets[2].status,
        TargetStatus::Failed { reason, .. } if reason.contains("last line")
    ));
}

#[tokio::test]
async fn test_unparsable_value_line_aborts_precheck() {
    let broken = target("acme/deploy", "values.yaml", "myapp");
    let store = FakeStore::default().with_file(
        &broken.location(),
        "# gitops-replacer: myapp\njust some text\n",
    );
    let context = context("2.0.0", true);

    let outcome = Pipeline::new(&store, &context).run(&[broken]).await;

    assert_eq!(outcome.failed_phase, Some(Phase::Prechecking));
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let myapp = target("acme/deploy", "values.yaml", "myapp");
    let store = FakeStore::default().with_file(&myapp.location(), MYAPP);
    let context = context("2.0.0", true);

    let first = Pipeline::new(&store, &context).run(&[myapp.clone()]).await;
    let second = Pipeline::new(&store, &context).run(&[myapp.clone()]).await;

    assert_eq!(first.committed(), 1);
    assert_eq!(second.exit_code(), 0);
    assert_eq!(second.changed(), 0);
    assert_eq!(store.commit_count(), 1);
    assert_eq!(
        second.targets[0].status,
        TargetStatus::Unchanged {
            value: "2.0.0".to_string()
        }
    );
}

#[tokio::test]
async fn test_commit_failures_are_isolated_per_target() {
    let rejected = target("acme/one", "values.yaml", "myapp");
    let accepted = target("acme/two", "values.yaml", "myapp");
    let store = FakeStore::default()
        .with_file(&rejected.location(), MYAPP)
        .with_file(&accepted.location(), MYAPP)
        .rejecting(&rejected.location());
    let context = context("2.0.0", true);

    let outcome = Pipeline::new(&store, &context)
        .run(&[rejected.clone(), accepted.clone()])
        .await;

    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.failed_phase, Some(Phase::Committing));
    assert_eq!(store.commit_count(), 2);
    assert!(matches!(
        &outcome.targets[0].status,
        TargetStatus::Failed { phase: Phase::Committing, reason } if reason.contains("Conflict")
    ));
    assert!(matches!(
        outcome.targets[1].status,
        TargetStatus::Committed { .. }
    ));
    assert_eq!(store.content(&rejected.location()), MYAPP);
    assert!(store.content(&accepted.location()).contains("\"2.0.0\""));
}

#[tokio::test]
async fn test_targets_sharing_a_file_commit_in_sequence() {
    let content = "\
# gitops-replacer: api
api: 1.0.0
# gitops-replacer: worker
worker: '1.0.0' # pinned
";
    let api = target("acme/deploy", "values.yaml", "api");
    let worker = target("acme/deploy", "values.yaml", "worker");
    let store = FakeStore::default().with_file(&api.location(), content);
    let context = context("2.0.0", true);

    let mut pipeline = Pipeline::new(&store, &context);
    let outcome = pipeline.run(&[api.clone(), worker]).await;

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(pipeline.cache().len(), 1);
    assert_eq!(store.fetches.borrow().len(), 1);

    let commits = store.commits.borrow();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].prior_sha, "sha-values.yaml");
    assert_eq!(commits[1].prior_sha, "sha-commit-1");
    assert_eq!(commits[1].message, "fix: update worker to 2.0.0");
    assert_eq!(
        store.content(&api.location()),
        "# gitops-replacer: api\napi: 2.0.0\n# gitops-replacer: worker\nworker: '2.0.0' # pinned\n"
    );
}

#[tokio::test]
async fn test_failed_commit_does_not_block_same_file() {
    let content = "\
# gitops-replacer: api
api: 1.0.0
# gitops-replacer: worker
worker: 1.0.0
";
    let api = target("acme/deploy", "values.yaml", "api");
    let worker = target("acme/deploy", "values.yaml", "worker");
    let store = FakeStore::default()
        .with_file(&api.location(), content)
        .unavailable_for("fix: update api to 2.0.0");
    let context = context("2.0.0", true);

    let outcome = Pipeline::new(&store, &context)
        .run(&[api.clone(), worker])
        .await;

    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.failed_phase, Some(Phase::Committing));
    assert!(matches!(
        outcome.targets[0].status,
        TargetStatus::Failed {
            phase: Phase::Committing,
            ..
        }
    ));
    assert!(matches!(
        outcome.targets[1].status,
        TargetStatus::Committed { .. }
    ));

    let commits = store.commits.borrow();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[1].message, "fix: update worker to 2.0.0");
    assert_eq!(commits[1].prior_sha, "sha-values.yaml");
    assert_eq!(
        commits[1].content,
        "# gitops-replacer: api\napi: 1.0.0\n# gitops-replacer: worker\nworker: 2.0.0\n"
    );
    assert_eq!(store.content(&api.location()), commits[1].content);
}

#[tokio::test]
async fn test_update_never_touches_other_markers() {
    let content = "# gitops-replacer: a\na: 1.0.0\n# gitops-replacer: b\nb: 1.0.0\n";
    let b = target("acme/deploy", "values.yaml", "b");
    let store = FakeStore::default().with_file(&b.location(), content);
    let context = context("3.0.0", true);

    Pipeline::new(&store, &context).run(&[b.clone()]).await;

    assert_eq!(
        store.content(&b.location()),
        "# gitops-replacer: a\na: 1.0.0\n# gitops-replacer: b\nb: 3.0.0\n"
    );
}

#[tokio::test]
async fn test_ci_gate_skips_targets_without_fetching() {
    let mut production = target("acme/deploy", "prod.yaml", "myapp");
    production.when = Some(RefPattern::new("^refs/tags/").unwrap());
    let mut staging = target("acme/deploy", "staging.yaml", "myapp");
    staging.when = Some(RefPattern::new("^refs/heads/main").unwrap());
    staging.except = Some(RefPattern::new("^refs/heads/main-legacy$").unwrap());

    let store = FakeStore::default()
        .with_file(&production.location(), MYAPP)
        .with_file(&staging.location(), MYAPP);
    let mut context = context("2.0.0", true);
    context.git_ref = Some("refs/heads/main-2".to_string());

    let outcome = Pipeline::new(&store, &context)
        .run(&[production.clone(), staging.clone()])
        .await;

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(*store.fetches.borrow(), vec![staging.location()]);
    assert!(matches!(
        &outcome.targets[0].status,
        TargetStatus::Skipped { reason } if reason.contains("does not match when pattern")
    ));
    assert!(matches!(
        outcome.targets[1].status,
        TargetStatus::Committed { .. }
    ));
}

#[tokio::test]
async fn test_ci_gate_except_pattern() {
    let mut myapp = target("acme/deploy", "values.yaml", "myapp");
    myapp.except = Some(RefPattern::new("^refs/heads/dependabot/").unwrap());
    let store = FakeStore::default().with_file(&myapp.location(), MYAPP);
    let mut context = context("2.0.0", true);
    context.git_ref = Some("refs/heads/dependabot/npm".to_string());

    let outcome = Pipeline::new(&store, &context).run(&[myapp]).await;

    assert_eq!(outcome.exit_code(), 0);
    assert!(store.fetches.borrow().is_empty());
    assert!(matches!(
        outcome.targets[0].status,
        TargetStatus::Skipped { .. }
    ));
}
