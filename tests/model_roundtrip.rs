// tests/model_roundtrip.rs

//! System model files: formatting, editing and snapshots on disk.

use conary_planner::model::{ModelOp, SearchItem, TroveOpKind};
use conary_planner::{ModelFile, SystemModel, TroveSpec};
use std::fs;

const MODEL: &str = "\
# base system
search group-os=repo@rpl:2

install   group-os    # indented comment stays
offer nginx

# local changes
erase sendmail
update 'openssl=repo@rpl:2-security'
";

#[test]
fn test_unmodified_model_formats_byte_for_byte() {
    let model = SystemModel::parse(MODEL).unwrap();
    assert!(!model.modified());
    assert_eq!(model.format(), MODEL);
}

#[test]
fn test_appended_operation_follows_last_operation() {
    let mut model = SystemModel::parse(MODEL).unwrap();
    model.append_trove_op(TroveOpKind::Install, vec![TroveSpec::new("vim")]);
    assert!(model.modified());

    let text = model.format();
    assert!(text.starts_with("# base system\n"));
    assert!(text.ends_with("update 'openssl=repo@rpl:2-security'\ninstall vim\n"), "got:\n{}", text);

    let reparsed = SystemModel::parse(&text).unwrap();
    assert_eq!(reparsed.format(), text);
}

#[test]
fn test_erasing_just_installed_spec_drops_both() {
    let mut model = SystemModel::parse("install foo\n").unwrap();
    model.append_trove_op(TroveOpKind::Install, vec![TroveSpec::new("bar")]);
    model.append_trove_op(TroveOpKind::Erase, vec![TroveSpec::new("bar")]);
    assert_eq!(model.format(), "install foo\n");
}

#[test]
fn test_new_comment_and_version_lead_the_file() {
    let mut model = SystemModel::parse("install foo\n").unwrap();
    model.append_op(ModelOp::NoOp("# managed".to_string()));
    model.append_op(ModelOp::Version("group-os=2.0".to_string()));
    model.append_op(ModelOp::Search(SearchItem::Label("repo@rpl:2".parse().unwrap())));
    assert_eq!(model.format(), "# managed\nversion group-os=2.0\ninstall foo\nsearch repo@rpl:2\n");
    assert_eq!(model.version(), Some("group-os=2.0"));
}

#[test]
fn test_bad_line_reports_its_number() {
    let err = SystemModel::parse("install foo\nfrobnicate bar\n").unwrap_err();
    assert!(err.to_string().contains('2'), "unexpected error: {}", err);
}

#[test]
fn test_snapshot_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("system-model");
    fs::write(&path, "install foo\n").unwrap();

    let mut file = ModelFile::open(&path).unwrap();
    file.model.append_trove_op(TroveOpKind::Install, vec![TroveSpec::new("bar")]);
    file.write_snapshot().unwrap();
    assert!(file.snapshot_exists());
    assert_eq!(fs::read_to_string(&path).unwrap(), "install foo\n");

    // an interrupted update resumes toward the snapshot
    let resumed = ModelFile::open(&path).unwrap();
    assert_eq!(resumed.model.format(), "install foo\ninstall bar\n");

    resumed.close_snapshot().unwrap();
    assert!(!resumed.snapshot_exists());
    assert_eq!(fs::read_to_string(&path).unwrap(), "install foo\ninstall bar\n");
}

#[test]
fn test_abandoned_snapshot_is_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("system-model");
    fs::write(&path, "install foo\n").unwrap();

    let mut file = ModelFile::open(&path).unwrap();
    file.model.append_trove_op(TroveOpKind::Erase, vec![TroveSpec::new("foo")]);
    file.write_snapshot().unwrap();
    file.delete_snapshot().unwrap();

    let reopened = ModelFile::open(&path).unwrap();
    assert_eq!(reopened.model.format(), "install foo\n");
}
