// tests/saved_job.rs

//! Saving a split job and restarting it.

mod common;

use common::{Fixture, at, trove};
use conary_planner::{JobTuple, SavedJob};

#[test]
fn test_job_text_form_survives_a_restart() {
    let old = at("foo", "1.0:1.0-1-1");
    let new = at("foo", "2.0:2.0-1-1");
    let jobs = vec![
        vec![JobTuple::update(&old, &new)],
        vec![JobTuple::install(&at("bar", "1.0:1.0-1-1"), true)],
        vec![JobTuple::erase(&at("baz", "1.0:1.0-1-1"))],
    ];

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.json");
    SavedJob::new(&jobs).save(&path).unwrap();

    let loaded = SavedJob::load(&path).unwrap();
    assert_eq!(loaded.applied, 0);
    assert_eq!(loaded.remaining().unwrap(), jobs);
    assert!(loaded.remaining().unwrap()[1][0].absolute);
}

#[test]
fn test_applied_sub_jobs_are_skipped() {
    let jobs = vec![
        vec![JobTuple::install(&at("a", "1.0:1.0-1-1"), false)],
        vec![JobTuple::install(&at("b", "1.0:1.0-1-1"), false)],
    ];
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.json");

    let mut saved = SavedJob::new(&jobs);
    saved.mark_applied(1);
    saved.save(&path).unwrap();

    let mut loaded = SavedJob::load(&path).unwrap();
    assert_eq!(loaded.remaining().unwrap(), jobs[1..].to_vec());
    loaded.mark_applied(5);
    assert!(loaded.remaining().unwrap().is_empty());
}

#[test]
fn test_planned_split_restarts_to_same_jobs() {
    let mut fx = Fixture::new();
    fx.publish(trove(&at("foo", "1.0:1.0-1-1")).build());
    fx.publish(trove(&at("bar", "1.0:1.0-1-1")).requires(&["trove: foo"]).build());
    let plan = fx.plan_model("install bar\n").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.json");
    SavedJob::new(&plan.split).save(&path).unwrap();
    let remaining = SavedJob::load(&path).unwrap().remaining().unwrap();
    assert_eq!(remaining, plan.split);

    let mut restored: Vec<JobTuple> = remaining.into_iter().flatten().collect();
    restored.sort();
    assert_eq!(restored, plan.jobs);
}

#[test]
fn test_malformed_job_text_is_rejected() {
    assert!(JobTuple::parse("no-equals-sign", false).is_err());
    assert!(JobTuple::parse("foo=--", false).is_err());
}
