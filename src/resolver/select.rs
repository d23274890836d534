// src/resolver/select.rs

//! Choosing one provider among several candidates

use crate::flavor::FlavorSpec;
use crate::source::InstalledState;
use crate::trove::TroveTuple;
use std::cmp::Reverse;

/// Pick the candidate to install for a requirement of `required_by`
///
/// In order of preference:
/// 1. a candidate on the label of an installed trove of the same name (or
///    of `required_by` when none is installed) whose flavor still scores
///    once the installed flavor is merged in, without dropping an
///    architecture
/// 2. the best flavor score against the install flavor path
/// 3. the newest timestamp
/// 4. the smallest name
///
/// Candidates no install flavor accepts are never chosen.
pub fn select_resolution_trove(
    installed: &dyn InstalledState,
    required_by: &TroveTuple,
    candidates: &[TroveTuple],
    flavors: &[FlavorSpec],
) -> Option<TroveTuple> {
    let empty = [FlavorSpec::empty()];
    let flavors = if flavors.is_empty() { &empty[..] } else { flavors };

    candidates
        .iter()
        .filter_map(|candidate| {
            let score = flavors
                .iter()
                .enumerate()
                .find_map(|(rank, f)| f.score(&candidate.flavor).map(|s| (Reverse(rank), s)))?;
            let affinity = affinity_match(installed, required_by, candidate, flavors);
            Some((
                (affinity, score, candidate.version.timestamp(), Reverse(candidate.name.clone())),
                candidate,
            ))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, candidate)| candidate.clone())
}

fn affinity_match(
    installed: &dyn InstalledState,
    required_by: &TroveTuple,
    candidate: &TroveTuple,
    flavors: &[FlavorSpec],
) -> bool {
    let mut affinity = installed.troves_by_name(&candidate.name);
    if affinity.is_empty() {
        affinity.push(required_by.clone());
    }

    affinity.iter().any(|inst| {
        inst.version.trailing_label() == candidate.version.trailing_label()
            && flavors.iter().any(|install_flavor| {
                let (merged, drops_arch) = install_flavor.merge_preferences(&inst.flavor);
                !drops_arch && merged.score(&candidate.flavor).is_some()
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryDatabase;
    use crate::trove::Trove;

    fn tup(s: &str) -> TroveTuple {
        TroveTuple::parse(s).unwrap()
    }

    // === Selection tests ===

    #[test]
    fn test_prefers_installed_label() {
        let mut db = MemoryDatabase::new();
        db.add(Trove::new(tup("libfoo=/repo@rpl:1/1.0:1.0-1-1")));
        let candidates = vec![tup("libfoo=/repo@rpl:2/9.0:2.0-1-1"), tup("libfoo=/repo@rpl:1/2.0:1.1-1-1")];

        let pick = select_resolution_trove(&db, &tup("app=/repo@rpl:2/1.0-1-1"), &candidates, &[]);
        assert_eq!(pick, Some(tup("libfoo=/repo@rpl:1/1.1-1-1")));
    }

    #[test]
    fn test_falls_back_to_requirer_label() {
        let db = MemoryDatabase::new();
        let candidates = vec![tup("libfoo=/repo@rpl:2/9.0:2.0-1-1"), tup("libfoo=/repo@rpl:1/2.0:1.1-1-1")];
        let pick = select_resolution_trove(&db, &tup("app=/repo@rpl:1/1.0-1-1"), &candidates, &[]);
        assert_eq!(pick, Some(tup("libfoo=/repo@rpl:1/1.1-1-1")));
    }

    #[test]
    fn test_flavor_score_then_timestamp() {
        let db = MemoryDatabase::new();
        let flavor = FlavorSpec::parse("ssl").unwrap();
        let candidates = vec![
            tup("libfoo=/repo@rpl:2/9.0:2.0-1-1[!ssl]"),
            tup("libfoo=/repo@rpl:2/1.0:1.0-1-1[ssl]"),
            tup("libssl=/repo@rpl:2/5.0:1.0-1-1[ssl]"),
        ];
        let pick = select_resolution_trove(&db, &tup("app=/other@rpl:3/1.0-1-1"), &candidates, &[flavor]);
        assert_eq!(pick, Some(tup("libssl=/repo@rpl:2/1.0-1-1[ssl]")));
    }

    #[test]
    fn test_name_breaks_ties() {
        let db = MemoryDatabase::new();
        let candidates = vec![tup("libz=/repo@rpl:2/1.0:1.0-1-1"), tup("liba=/repo@rpl:2/1.0:1.0-1-1")];
        let pick = select_resolution_trove(&db, &tup("app=/other@rpl:3/1.0-1-1"), &candidates, &[]);
        assert_eq!(pick, Some(tup("liba=/repo@rpl:2/1.0-1-1")));
    }
}
