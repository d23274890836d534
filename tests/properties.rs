// tests/properties.rs

//! Properties every plan must hold, checked over small systems.

mod common;

use common::{Fixture, at, job_names, trove};
use conary_planner::update::{ErasureInput, find_erasures};
use conary_planner::{JobTuple, TroveTuple};
use std::collections::BTreeSet;

/// A group with packages, one of which needs a provider outside the group
fn group_system() -> Fixture {
    let mut fx = Fixture::new();
    let app = fx.publish_package("app", "1.0:1.0-1-1", &[], &["soname: libz.so.1"]);
    let tool = fx.publish_package("tool", "1.0:1.0-1-1", &[], &[]);
    fx.publish_package("zlib", "1.0:1.0-1-1", &["soname: libz.so.1"], &[]);
    fx.publish(trove(&at("group-os", "1.0:1.0-1-1")).contains(&app).contains(&tool).build());
    fx
}

// === Idempotence ===

#[test]
fn test_applying_a_plan_reaches_a_fixed_point() {
    let mut fx = group_system();
    let first = fx.plan_model("install group-os\n").unwrap();
    assert!(!first.is_empty());
    fx.apply(&first);

    let second = fx.plan_model("install group-os\n").unwrap();
    assert!(second.is_empty(), "second plan not empty: {:?}", second.jobs);
}

#[test]
fn test_fixed_point_after_group_update() {
    let mut fx = group_system();
    let first = fx.plan_model("install group-os\n").unwrap();
    fx.apply(&first);

    let app2 = fx.publish_package("app", "2.0:2.0-1-1", &[], &["soname: libz.so.1"]);
    let tool = at("tool", "1.0:1.0-1-1");
    fx.publish(trove(&at("group-os", "2.0:2.0-1-1")).contains(&app2).contains(&tool).build());

    let update = fx.plan_model("install group-os\n").unwrap();
    assert!(update.jobs.iter().any(|j| j.name == "app" && j.is_update()));
    fx.apply(&update);

    let again = fx.plan_model("install group-os\n").unwrap();
    assert!(again.is_empty(), "plan after update not empty: {:?}", again.jobs);
}

// === No duplicates ===

#[test]
fn test_no_identity_appears_twice() {
    let mut fx = group_system();
    fx.install(trove(&at("stale", "1.0:1.0-1-1")).build());
    let plan = fx.plan_model("install group-os\ninstall app\n").unwrap();

    let mut olds = BTreeSet::new();
    let mut news = BTreeSet::new();
    for job in &plan.jobs {
        if let Some(old) = job.old_tuple() {
            assert!(olds.insert(old.clone()), "{} removed twice", old);
        }
        if let Some(new) = job.new_tuple() {
            assert!(news.insert(new.clone()), "{} installed twice", new);
        }
    }
}

// === Erase reachability ===

#[test]
fn test_erased_troves_are_unreachable_from_kept_roots() {
    let mut fx = Fixture::new();
    let shared = fx.install(trove(&at("shared", "1.0:1.0-1-1")).build());
    let only = fx.install(trove(&at("only", "1.0:1.0-1-1")).build());
    let old = fx.install(trove(&at("group-old", "1.0:1.0-1-1")).contains(&shared).contains(&only).build());
    fx.install(trove(&at("group-other", "1.0:1.0-1-1")).contains(&shared).build());

    let input = ErasureInput {
        primary: vec![old.clone()],
        ..Default::default()
    };
    let plan = find_erasures(&fx.db, &input);
    assert!(plan.erase.contains(&old));
    assert!(plan.erase.contains(&only));
    assert!(!plan.erase.contains(&shared), "shared is still referenced by group-other");

    let reachable = plan.reachable_from_roots();
    for erased in &plan.erase {
        assert!(!reachable.contains(erased), "{} is reachable from a kept root", erased);
    }
}

#[test]
fn test_planned_erases_spare_shared_members() {
    let mut fx = Fixture::new();
    let shared = fx.install(trove(&at("shared", "1.0:1.0-1-1")).build());
    let only = fx.install(trove(&at("only", "1.0:1.0-1-1")).build());
    let old = fx.install(trove(&at("group-old", "1.0:1.0-1-1")).contains(&shared).contains(&only).build());
    fx.install(trove(&at("group-other", "1.0:1.0-1-1")).contains(&shared).build());

    let plan = fx.plan_jobs(&[JobTuple::erase(&old)]).unwrap();
    let erased: BTreeSet<TroveTuple> = plan.jobs.iter().filter_map(JobTuple::old_tuple).collect();
    assert!(erased.contains(&old));
    assert!(erased.contains(&only));
    assert!(!erased.contains(&shared));
}

// === Branch affinity ===

#[test]
fn test_group_update_keeps_local_newer_member() {
    let mut fx = Fixture::new();
    let foo1 = fx.publish(trove(&at("foo", "1.0:1.0-1-1")).build());
    let foo2 = fx.publish(trove(&at("foo", "2.0:2.0-1-1")).build());
    let local = fx.install(trove(&at("foo", "3.0:3.0-1-1")).build());
    let group1 = fx.install(trove(&at("group-os", "1.0:1.0-1-1")).contains(&foo1).build());
    let group2 = fx.publish(trove(&at("group-os", "2.0:2.0-1-1")).contains(&foo2).build());

    let plan = fx.plan_model("install group-os\n").unwrap();
    assert_eq!(plan.jobs, vec![JobTuple::update(&group1, &group2)]);
    assert!(
        plan.jobs.iter().all(|j| j.old_tuple() != Some(local.clone())),
        "locally updated foo must not be downgraded"
    );
}

// === Pin safety ===

#[test]
fn test_pinned_trove_is_never_replaced() {
    let mut fx = Fixture::new();
    let kernel1 = fx.install(trove(&at("kernel", "1.0:1.0-1-1")).paths(&["/boot/vmlinuz-1"]).build());
    let kernel2 = fx.publish(trove(&at("kernel", "2.0:2.0-1-1")).paths(&["/boot/vmlinuz-2"]).build());
    fx.db.pin(&kernel1);

    let plan = fx.plan_model("install kernel\n").unwrap();
    assert_eq!(plan.jobs, vec![JobTuple::install(&kernel2, false)]);
    assert_eq!(plan.pin_mappings, vec![(kernel1.clone(), kernel2)]);
    assert!(plan.jobs.iter().all(|j| j.old_tuple() != Some(kernel1.clone())));
}

#[test]
fn test_pinned_trove_with_overlapping_paths_blocks_update() {
    let mut fx = Fixture::new();
    let kernel1 = fx.install(trove(&at("kernel", "1.0:1.0-1-1")).paths(&["/boot/vmlinuz"]).build());
    fx.publish(trove(&at("kernel", "2.0:2.0-1-1")).paths(&["/boot/vmlinuz"]).build());
    fx.db.pin(&kernel1);

    let plan = fx.plan_model("install kernel\n").unwrap();
    assert!(!job_names(&plan.jobs).contains(&"kernel"), "unexpected jobs: {:?}", plan.jobs);
}

#[test]
fn test_explicit_erase_of_pinned_trove_fails() {
    let mut fx = Fixture::new();
    let kernel = fx.install(trove(&at("kernel", "1.0:1.0-1-1")).build());
    fx.db.pin(&kernel);

    assert!(fx.plan_jobs(&[JobTuple::erase(&kernel)]).is_err());
}
