//! SF-004: Partition planning from a reference universe and assigned lines.
//!
//! The assignment file lists identifier subsets already bound to a
//! partition. Whatever the reference universe holds beyond those lines
//! becomes one synthetic trailing partition. Partition policy:
//!
//! | index      | parameter sets                                   |
//! |------------|--------------------------------------------------|
//! | 0          | `emp_set_1`: special, then other                 |
//! | 1          | none (handled upstream)                          |
//! | 2 ..= N-2  | `emp_set_<i+1>`: other                           |
//! | N-1        | `other`: other, then special                     |

use super::error::PlanError;
use super::types::*;
use crate::backend::{Backend, Connection};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

pub const SPECIAL: &str = "special";
pub const OTHER: &str = "other";

/// Parse assignment text: one comma-separated identifier list per line.
/// Blank lines are ignored, as are stray commas and whitespace.
pub fn parse_assignment(text: &str) -> Result<Vec<Vec<i64>>, PlanError> {
    let mut lines = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let trimmed = raw.trim().trim_matches(',');
        if trimmed.trim().is_empty() {
            continue;
        }
        let mut ids = Vec::new();
        for token in trimmed.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let id = token
                .parse::<i64>()
                .map_err(|_| PlanError::InvalidIdentifier {
                    line: lineno + 1,
                    token: token.to_string(),
                })?;
            ids.push(id);
        }
        lines.push(ids);
    }
    Ok(lines)
}

/// Read and parse an assignment file.
pub fn read_assignment_file(path: &Path) -> Result<Vec<Vec<i64>>, PlanError> {
    let text = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_assignment(&text)
}

/// Run the reference query and collect its first column as identifiers.
pub fn load_reference(conn: &mut dyn Connection, query: &str) -> Result<BTreeSet<i64>, PlanError> {
    let rows = conn
        .query_rows(query)
        .map_err(|e| PlanError::Reference(e.to_string()))?;
    let mut ids = BTreeSet::new();
    for row in rows {
        let first = row
            .first()
            .ok_or_else(|| PlanError::Reference("reference query returned no columns".into()))?;
        let id = first.trim().parse::<i64>().map_err(|_| {
            PlanError::Reference(format!("'{}' is not an integer identifier", first))
        })?;
        ids.insert(id);
    }
    Ok(ids)
}

/// Fail if any identifier appears on two different lines.
fn check_disjoint(lines: &[Vec<i64>]) -> Result<(), PlanError> {
    let mut seen: FxHashMap<i64, usize> = FxHashMap::default();
    for (i, line) in lines.iter().enumerate() {
        for &id in line {
            match seen.get(&id) {
                Some(&first) if first != i => {
                    return Err(PlanError::OverlappingAssignment {
                        id,
                        first_line: first + 1,
                        second_line: i + 1,
                    });
                }
                Some(_) => {}
                None => {
                    seen.insert(id, i);
                }
            }
        }
    }
    Ok(())
}

fn parameter_set(ids: &[i64], condition: &str, partition: String, sub: &str) -> ParameterSet {
    ParameterSet {
        ids: ids.to_vec(),
        condition: condition.to_string(),
        partition,
        sub_partition: sub.to_string(),
    }
}

/// Build the plan from a reference universe and the assignment lines.
pub fn plan(
    reference: &BTreeSet<i64>,
    lines: &[Vec<i64>],
    conditions: &Conditions,
) -> Result<Plan, PlanError> {
    check_disjoint(lines)?;

    let assigned: BTreeSet<i64> = lines.iter().flatten().copied().collect();
    let stray: Vec<_> = assigned.difference(reference).collect();
    if !stray.is_empty() {
        warn!(count = stray.len(), "assigned identifiers not in reference universe: {:?}", stray);
    }
    let missing: Vec<i64> = reference.difference(&assigned).copied().collect();

    let mut partitions: Vec<Partition> = lines
        .iter()
        .enumerate()
        .map(|(index, ids)| Partition {
            index,
            ids: ids.clone(),
        })
        .collect();
    partitions.push(Partition {
        index: lines.len(),
        ids: missing.clone(),
    });

    let last = partitions.len() - 1;
    let mut parameter_sets = Vec::new();

    for partition in &partitions {
        let ids = &partition.ids;
        let label = format!("emp_set_{}", partition.index + 1);
        match partition.index {
            0 => {
                parameter_sets.push(parameter_set(ids, &conditions.special, label.clone(), SPECIAL));
                parameter_sets.push(parameter_set(ids, &conditions.other, label, OTHER));
            }
            1 => {
                if partition.index == last && !ids.is_empty() {
                    warn!(
                        count = ids.len(),
                        "unassigned identifiers fall on skipped partition 2 and will not run"
                    );
                }
                info!(partition = %label, ids = ids.len(), "skipping partition");
            }
            i if i == last => {
                parameter_sets.push(parameter_set(ids, &conditions.other, OTHER.to_string(), OTHER));
                parameter_sets.push(parameter_set(ids, &conditions.special, OTHER.to_string(), SPECIAL));
            }
            _ => {
                parameter_sets.push(parameter_set(ids, &conditions.other, label, OTHER));
            }
        }
    }

    debug!(
        partitions = partitions.len(),
        parameter_sets = parameter_sets.len(),
        missing = missing.len(),
        "plan built"
    );

    Ok(Plan {
        partitions,
        parameter_sets,
        missing,
    })
}

/// Load the reference universe and the assignment file once, then plan.
pub fn plan_from_backend(backend: &dyn Backend, spec: &PartitionSpec) -> Result<Plan, PlanError> {
    let mut conn = backend
        .open()
        .map_err(|e| PlanError::Reference(e.to_string()))?;
    let reference = load_reference(conn.as_mut(), &spec.reference_query);
    let closed = conn.close();
    let reference = reference?;
    closed.map_err(|e| PlanError::Reference(e.to_string()))?;

    let lines = read_assignment_file(&spec.assignment_file)?;
    plan(&reference, &lines, &spec.conditions())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{rows, FakeBackend};
    use proptest::prelude::*;

    fn conds() -> Conditions {
        Conditions::new("carrier_id = 15", Some("carrier_id != 15"))
    }

    fn universe(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_sf004_parse_assignment() {
        let lines = parse_assignment("1,2,3\n,4,5,\n\n 6 , 7\n").unwrap();
        assert_eq!(lines, vec![vec![1, 2, 3], vec![4, 5], vec![6, 7]]);
    }

    #[test]
    fn test_sf004_parse_assignment_bad_token() {
        let err = parse_assignment("1,2\n3,x\n").unwrap_err();
        match err {
            PlanError::InvalidIdentifier { line, token } => {
                assert_eq!(line, 2);
                assert_eq!(token, "x");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_sf004_plan_policy() {
        let reference = universe(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let lines = vec![vec![1, 2], vec![3], vec![4], vec![5, 6]];
        let p = plan(&reference, &lines, &conds()).unwrap();

        assert_eq!(p.missing, vec![7, 8, 9]);
        assert_eq!(p.partitions.len(), 5);

        let labels: Vec<_> = p
            .parameter_sets
            .iter()
            .map(|s| (s.partition.as_str(), s.sub_partition.as_str(), s.condition.as_str()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("emp_set_1", "special", "carrier_id = 15"),
                ("emp_set_1", "other", "carrier_id != 15"),
                ("emp_set_3", "other", "carrier_id != 15"),
                ("emp_set_4", "other", "carrier_id != 15"),
                ("other", "other", "carrier_id != 15"),
                ("other", "special", "carrier_id = 15"),
            ]
        );
        assert_eq!(p.parameter_sets[0].ids, vec![1, 2]);
        assert_eq!(p.parameter_sets[2].ids, vec![4]);
        assert_eq!(p.parameter_sets[5].ids, vec![7, 8, 9]);
    }

    #[test]
    fn test_sf004_partition_one_never_emitted() {
        let reference = universe(&[1, 2, 3, 4]);
        let lines = vec![vec![1], vec![2, 3]];
        let p = plan(&reference, &lines, &conds()).unwrap();
        assert!(p.parameter_sets.iter().all(|s| s.ids != vec![2, 3]));
        assert!(p.parameter_sets.iter().all(|s| s.partition != "emp_set_2"));
    }

    #[test]
    fn test_sf004_empty_missing_is_vacuous() {
        let reference = universe(&[1, 2, 3]);
        let lines = vec![vec![1], vec![2], vec![3]];
        let p = plan(&reference, &lines, &conds()).unwrap();
        assert!(p.missing.is_empty());
        let last = &p.parameter_sets[p.parameter_sets.len() - 1];
        assert_eq!(last.partition, "other");
        assert!(last.ids.is_empty());
        assert_eq!(last.bindings()["ids"], "");
    }

    #[test]
    fn test_sf004_no_assignment_lines() {
        let reference = universe(&[5, 6]);
        let p = plan(&reference, &[], &conds()).unwrap();
        // A single partition: index 0 policy wins over the final-partition policy
        assert_eq!(p.parameter_sets.len(), 2);
        assert_eq!(p.parameter_sets[0].partition, "emp_set_1");
        assert_eq!(p.parameter_sets[0].ids, vec![5, 6]);
    }

    #[test]
    fn test_sf004_overlap_rejected() {
        let reference = universe(&[1, 2, 3]);
        let lines = vec![vec![1, 2], vec![3], vec![2]];
        let err = plan(&reference, &lines, &conds()).unwrap_err();
        match err {
            PlanError::OverlappingAssignment {
                id,
                first_line,
                second_line,
            } => {
                assert_eq!(id, 2);
                assert_eq!(first_line, 1);
                assert_eq!(second_line, 3);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_sf004_duplicate_within_line_allowed() {
        let reference = universe(&[1, 2]);
        assert!(plan(&reference, &[vec![1, 1]], &conds()).is_ok());
    }

    #[test]
    fn test_sf004_load_reference() {
        let backend = FakeBackend::new().with("select id from t", rows(&[&["3"], &["1"], &["3"]]));
        let mut conn = backend.open().unwrap();
        let ids = load_reference(conn.as_mut(), "select id from t").unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_sf004_load_reference_non_integer() {
        let backend = FakeBackend::new().with("select id from t", rows(&[&["abc"]]));
        let mut conn = backend.open().unwrap();
        assert!(matches!(
            load_reference(conn.as_mut(), "select id from t"),
            Err(PlanError::Reference(_))
        ));
    }

    #[test]
    fn test_sf004_plan_from_backend() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sets.cfg");
        std::fs::write(&file, "10,20\n30\n40\n").unwrap();
        let backend = FakeBackend::new().with(
            "select employer_id from accounts",
            rows(&[&["10"], &["20"], &["30"], &["40"], &["50"]]),
        );
        let spec = PartitionSpec {
            reference_query: "select employer_id from accounts".into(),
            assignment_file: file,
            special_condition: "carrier_id = 15".into(),
            other_condition: None,
        };
        let p = plan_from_backend(&backend, &spec).unwrap();
        assert_eq!(p.missing, vec![50]);
        assert_eq!(p.parameter_sets.len(), 5);
        assert_eq!(p.parameter_sets[1].condition, "NOT (carrier_id = 15)");
        assert_eq!(backend.opens(), 1);
        assert_eq!(backend.closes(), 1);
    }

    #[test]
    fn test_sf004_plan_from_backend_unreachable() {
        let spec = PartitionSpec {
            reference_query: "select 1".into(),
            assignment_file: "unused.cfg".into(),
            special_condition: "x".into(),
            other_condition: None,
        };
        let err = plan_from_backend(&FakeBackend::unreachable(), &spec).unwrap_err();
        assert!(matches!(err, PlanError::Reference(_)));
    }

    /// Split a sorted universe into disjoint lines of the given sizes.
    fn split(universe: &[i64], sizes: &[usize]) -> Vec<Vec<i64>> {
        let mut lines = Vec::new();
        let mut rest = universe;
        for &size in sizes {
            let take = size.min(rest.len());
            lines.push(rest[..take].to_vec());
            rest = &rest[take..];
        }
        lines
    }

    proptest! {
        #[test]
        fn prop_sf004_plan_invariants(
            ids in proptest::collection::btree_set(0i64..500, 0..80),
            sizes in proptest::collection::vec(0usize..10, 0..8),
        ) {
            let all: Vec<i64> = ids.iter().copied().collect();
            let lines = split(&all, &sizes);
            let p = plan(&ids, &lines, &conds()).unwrap();
            let n = p.partitions.len();

            // Synthetic final partition = U - union(A)
            let assigned: BTreeSet<i64> = lines.iter().flatten().copied().collect();
            let expected: Vec<i64> = ids.difference(&assigned).copied().collect();
            prop_assert_eq!(&p.partitions[n - 1].ids, &expected);

            // Emitted ids plus the skipped partition cover the universe
            let mut covered: BTreeSet<i64> = p.parameter_sets.iter().flat_map(|s| s.ids.iter().copied()).collect();
            if n > 1 {
                covered.extend(p.partitions[1].ids.iter().copied());
            }
            prop_assert_eq!(&covered, &ids);

            // Set counts per partition
            let expected_sets = match n {
                1 => 2,
                2 => 2,
                _ => 2 + (n - 3) + 2,
            };
            prop_assert_eq!(p.parameter_sets.len(), expected_sets);
            prop_assert!(p.parameter_sets.iter().all(|s| s.partition != "emp_set_2"));
        }
    }
}
