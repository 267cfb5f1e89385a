//! Evidence cache reuse across commits

use pretty_assertions::assert_eq;
use std::sync::Arc;
use sva_cache::{
    EvidenceCacheStore, InvalidAssertion, InvalidationStrategy, MemoryBackend, SaveOutcome,
    SqliteBackend,
};
use sva_core::{EvaluationRequest, StepResult, StepReviewer, StoryEvaluator, SvaConfig};
use sva_evidence::MemoryFileHasher;
use sva_test_utils::{
    canned_tools, reset_password_checkout, reset_password_steps, reset_password_story,
    verdict_json, ScriptedGenerator, RESET_HANDLER, RESET_MAILER,
};

fn evaluator(generator: &Arc<ScriptedGenerator>, store: &EvidenceCacheStore, config: &SvaConfig) -> StoryEvaluator {
    StoryEvaluator::from_config(config, generator.clone(), canned_tools(), Some(store.clone()))
}

/// Script the first run: step 0 passes on handler + mailer, step 1 fails
fn script_first_run(generator: &ScriptedGenerator) {
    generator
        .plan(&reset_password_steps())
        .verdict(verdict_json(
            "pass",
            "reset link is mailed",
            &[
                (RESET_HANDLER, 10, 40, "handler issues token"),
                (RESET_MAILER, 1, 3, "mailer sends link"),
            ],
        ))
        .verdict(verdict_json("fail", "no password strength check", &[]));
}

async fn first_run(
    generator: &Arc<ScriptedGenerator>,
    store: &EvidenceCacheStore,
    config: &SvaConfig,
    checkout: &Arc<MemoryFileHasher>,
) {
    script_first_run(generator);
    let report = evaluator(generator, store, config)
        .evaluate(
            &EvaluationRequest::new(reset_password_story(), "main", "c1"),
            checkout.clone(),
        )
        .await
        .unwrap();
    assert_eq!(report.output.result, StepResult::Fail);
    assert_eq!(report.cache.saved, Some(SaveOutcome::Inserted));
}

#[tokio::test]
async fn unchanged_evidence_skips_the_reviewer() {
    let generator = Arc::new(ScriptedGenerator::new());
    let store = EvidenceCacheStore::new(MemoryBackend::new());
    let config = SvaConfig::default();
    let checkout = Arc::new(reset_password_checkout());
    first_run(&generator, &store, &config, &checkout).await;
    let reviews_before = generator.requests_for(StepReviewer::AGENT).len();

    generator.plan(&reset_password_steps());
    let request = EvaluationRequest::new(reset_password_story(), "main", "c2").with_ancestors(["c1"]);
    let report = evaluator(&generator, &store, &config)
        .evaluate(&request, checkout.clone())
        .await
        .unwrap();

    assert_eq!(report.cache.hit_commit.as_deref(), Some("c1"));
    assert!(report.cache.validation.as_ref().unwrap().is_valid);
    assert_eq!(report.cache.reused_steps, vec![0, 1]);
    assert_eq!(report.metrics.steps_reused, 2);
    assert_eq!(report.metrics.reviewer_iterations, 0);
    assert_eq!(generator.requests_for(StepReviewer::AGENT).len(), reviews_before);

    assert_eq!(report.output.result, StepResult::Fail);
    let reused = &report.output.steps[0];
    assert_eq!(reused.result, StepResult::Pass);
    let refs: Vec<_> = reused.code.iter().map(|c| c.evidence_ref()).collect();
    assert_eq!(refs, vec!["src/auth/reset.ts:10-40", "src/auth/mailer.ts:1-3"]);
    assert_eq!(report.output.steps[1].description, "no password strength check");

    // c2 gets its own row
    assert_eq!(report.cache.saved, Some(SaveOutcome::Inserted));
    assert!(store.get("reset-password", "c2").await.unwrap().is_some());
}

#[tokio::test]
async fn changed_file_re_reviews_its_step() {
    let generator = Arc::new(ScriptedGenerator::new());
    let store = EvidenceCacheStore::new(MemoryBackend::new());
    let config = SvaConfig::default();
    let checkout = Arc::new(reset_password_checkout());
    first_run(&generator, &store, &config, &checkout).await;

    checkout.write(RESET_MAILER, "export function sendResetLink(email, locale) {}");
    generator
        .plan(&reset_password_steps())
        .verdict(verdict_json("pass", "mailer still sends link", &[(RESET_MAILER, 1, 1, "")]));

    let request = EvaluationRequest::new(reset_password_story(), "main", "c3").with_ancestors(["c2", "c1"]);
    let report = evaluator(&generator, &store, &config)
        .evaluate(&request, checkout.clone())
        .await
        .unwrap();

    let validation = report.cache.validation.unwrap();
    assert!(!validation.is_valid);
    assert_eq!(validation.invalid_steps, vec![0]);
    assert_eq!(report.cache.reused_steps, vec![1]);
    assert_eq!(report.metrics.reviewer_iterations, 1);
    assert_eq!(report.output.steps[0].description, "mailer still sends link");
    assert_eq!(generator.remaining(StepReviewer::AGENT), 0);
}

#[tokio::test]
async fn assertion_strategy_flags_only_the_stale_assertion() {
    let generator = Arc::new(ScriptedGenerator::new());
    let store = EvidenceCacheStore::new(MemoryBackend::new());
    let config = SvaConfig::default().with_strategy(InvalidationStrategy::Assertion);
    let checkout = Arc::new(reset_password_checkout());
    first_run(&generator, &store, &config, &checkout).await;

    checkout.write(RESET_MAILER, "// rewritten");
    generator
        .plan(&reset_password_steps())
        .verdict(verdict_json("pass", "re-checked", &[]));

    let request = EvaluationRequest::new(reset_password_story(), "main", "c2").with_ancestors(["c1"]);
    let report = evaluator(&generator, &store, &config)
        .evaluate(&request, checkout.clone())
        .await
        .unwrap();

    let validation = report.cache.validation.unwrap();
    assert!(validation.invalid_steps.is_empty());
    // snippets are cached in order: handler first, mailer second
    assert_eq!(
        validation.invalid_assertions,
        vec![InvalidAssertion {
            step_index: 0,
            assertion_index: 1
        }]
    );
    assert_eq!(report.cache.reused_steps, vec![1]);
}

#[tokio::test]
async fn changed_prerequisite_re_reviews_later_steps() {
    let generator = Arc::new(ScriptedGenerator::new());
    let store = EvidenceCacheStore::new(MemoryBackend::new());
    let config = SvaConfig::default();
    let checkout = Arc::new(reset_password_checkout());

    generator
        .plan(&reset_password_steps())
        .verdict(verdict_json("pass", "reset link is mailed", &[(RESET_MAILER, 1, 3, "mailer sends link")]))
        .verdict(verdict_json("pass", "new password is stored", &[(RESET_HANDLER, 10, 40, "handler saves it")]));
    let first = evaluator(&generator, &store, &config)
        .evaluate(
            &EvaluationRequest::new(reset_password_story(), "main", "c1"),
            checkout.clone(),
        )
        .await
        .unwrap();
    assert_eq!(first.output.result, StepResult::Pass);

    checkout.remove(RESET_MAILER);
    generator
        .plan(&reset_password_steps())
        .verdict(verdict_json("not-implemented", "no mailer left", &[]))
        .verdict(verdict_json("blocked", "no link to follow", &[]));

    let request = EvaluationRequest::new(reset_password_story(), "main", "c2").with_ancestors(["c1"]);
    let report = evaluator(&generator, &store, &config)
        .evaluate(&request, checkout.clone())
        .await
        .unwrap();

    // step 1 is still clean in the cache, but its prerequisite changed
    assert_eq!(report.cache.validation.unwrap().invalid_steps, vec![0]);
    assert!(report.cache.reused_steps.is_empty());
    let results: Vec<_> = report.output.steps.iter().map(|s| s.result).collect();
    assert_eq!(results, vec![StepResult::NotImplemented, StepResult::Blocked]);
    assert_eq!(report.output.result, StepResult::Blocked);
    assert_eq!(generator.remaining(StepReviewer::AGENT), 0);
}

#[tokio::test]
async fn renamed_step_is_not_reused() {
    let generator = Arc::new(ScriptedGenerator::new());
    let store = EvidenceCacheStore::new(MemoryBackend::new());
    let config = SvaConfig::default();
    let checkout = Arc::new(reset_password_checkout());
    first_run(&generator, &store, &config, &checkout).await;

    generator
        .plan(&[
            ("request-reset-link", "User requests a password reset link by email"),
            ("choose-new-password", "User picks a password meeting the policy"),
        ])
        .verdict(verdict_json("pass", "policy enforced", &[]));

    let request = EvaluationRequest::new(reset_password_story(), "main", "c2").with_ancestors(["c1"]);
    let report = evaluator(&generator, &store, &config)
        .evaluate(&request, checkout.clone())
        .await
        .unwrap();

    assert_eq!(report.cache.reused_steps, vec![0]);
    assert_eq!(report.output.result, StepResult::Pass);
}

#[tokio::test]
async fn same_commit_keeps_the_first_entry() {
    let generator = Arc::new(ScriptedGenerator::new());
    let store = EvidenceCacheStore::new(MemoryBackend::new());
    let config = SvaConfig::default();
    let checkout = Arc::new(reset_password_checkout());
    first_run(&generator, &store, &config, &checkout).await;
    let original = store.get("reset-password", "c1").await.unwrap().unwrap();

    generator.plan(&reset_password_steps());
    let report = evaluator(&generator, &store, &config)
        .evaluate(
            &EvaluationRequest::new(reset_password_story(), "main", "c1"),
            checkout.clone(),
        )
        .await
        .unwrap();

    assert_eq!(report.cache.hit_commit.as_deref(), Some("c1"));
    assert_eq!(report.cache.saved, Some(SaveOutcome::AlreadyCached));
    let stored = store.get("reset-password", "c1").await.unwrap().unwrap();
    assert_eq!(stored.id, original.id);
    assert_eq!(stored.run_id, original.run_id);
}

#[tokio::test]
async fn story_change_drops_every_commit() {
    let generator = Arc::new(ScriptedGenerator::new());
    let store = EvidenceCacheStore::new(MemoryBackend::new());
    let config = SvaConfig::default();
    let checkout = Arc::new(reset_password_checkout());
    first_run(&generator, &store, &config, &checkout).await;

    evaluator(&generator, &store, &config)
        .story_changed("reset-password")
        .await
        .unwrap();
    assert!(store
        .get("reset-password", ["c1", "c2"])
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn sqlite_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("evidence.db");
    let generator = Arc::new(ScriptedGenerator::new());
    let config = SvaConfig::default();
    let checkout = Arc::new(reset_password_checkout());

    {
        let store = EvidenceCacheStore::new(SqliteBackend::open(&db).unwrap());
        first_run(&generator, &store, &config, &checkout).await;
    }

    let store = EvidenceCacheStore::new(SqliteBackend::open(&db).unwrap());
    generator.plan(&reset_password_steps());
    let request = EvaluationRequest::new(reset_password_story(), "feature", "c2").with_ancestors(["c1"]);
    let report = evaluator(&generator, &store, &config)
        .evaluate(&request, checkout.clone())
        .await
        .unwrap();

    assert_eq!(report.cache.reused_steps, vec![0, 1]);
    let row = store.get("reset-password", "c2").await.unwrap().unwrap();
    assert_eq!(row.branch_name, "feature");
}
