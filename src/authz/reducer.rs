use std::cmp::Ordering;

use crate::authz::schema::PrecedenceRule;
use crate::authz::types::Relationship;

/// True when any edge in the path carries the relation label. Edge direction
/// is irrelevant here.
pub fn path_contains(path: &[Relationship], relation: &str) -> bool {
    path.iter().any(|r| r.relation == relation)
}

pub fn path_count(path: &[Relationship], relation: &str) -> usize {
    path.iter().filter(|r| r.relation == relation).count()
}

/// Compares two paths under the precedence rules, consulted in declared
/// order; the first rule that discriminates decides. Less means `a` is the
/// more effective path.
pub fn compare(a: &[Relationship], b: &[Relationship], rules: &[PrecedenceRule]) -> Ordering {
    for rule in rules {
        let ord = match rule {
            PrecedenceRule::PathWith { relation } => {
                let a_has = path_contains(a, relation);
                let b_has = path_contains(b, relation);
                // Containing the relation wins.
                b_has.cmp(&a_has)
            }
            PrecedenceRule::PathWithout { relation } => {
                let a_has = path_contains(a, relation);
                let b_has = path_contains(b, relation);
                // Not containing the relation wins.
                a_has.cmp(&b_has)
            }
            PrecedenceRule::PathWithFewer { relation } => {
                path_count(a, relation).cmp(&path_count(b, relation))
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Keeps only the equally-best paths under the rules. The rule sequence
/// induces a preorder, so comparing each incoming path against a single
/// representative of the best set is sound: a path tied with the
/// representative is tied with every member.
pub fn effective_paths(
    paths: Vec<Vec<Relationship>>,
    rules: &[PrecedenceRule],
) -> Vec<Vec<Relationship>> {
    let mut iter = paths.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };

    let mut best = vec![first];
    for path in iter {
        match compare(&path, &best[0], rules) {
            Ordering::Less => {
                best.clear();
                best.push(path);
            }
            Ordering::Equal => best.push(path),
            Ordering::Greater => {}
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::Object;

    fn edge(resource: &str, relation: &str, subject: &str) -> Relationship {
        Relationship {
            resource: Object::parse(resource).unwrap(),
            subject: Object::parse(subject).unwrap(),
            relation: relation.to_string(),
        }
    }

    fn document_rules() -> Vec<PrecedenceRule> {
        vec![
            PrecedenceRule::PathWith {
                relation: "owner".into(),
            },
            PrecedenceRule::PathWithout {
                relation: "member".into(),
            },
            PrecedenceRule::PathWithFewer {
                relation: "parent".into(),
            },
        ]
    }

    #[test]
    fn test_path_contains_ignores_direction() {
        let path = vec![edge("document:d1", "owner", "user:alice")];
        assert!(path_contains(&path, "owner"));
        assert!(!path_contains(&path, "editor"));
        assert_eq!(path_count(&path, "owner"), 1);
    }

    #[test]
    fn test_compare_first_discriminating_rule_decides() {
        let rules = document_rules();
        let owner = vec![edge("document:d1", "owner", "user:alice")];
        let via_member = vec![
            edge("document:d1", "parent", "folder:f1"),
            edge("folder:f1", "member", "user:alice"),
        ];

        // `path_with owner` discriminates before the member rule is reached.
        assert_eq!(compare(&owner, &via_member, &rules), Ordering::Less);
        assert_eq!(compare(&via_member, &owner, &rules), Ordering::Greater);
    }

    #[test]
    fn test_compare_fewer_relation_edges_win() {
        let rules = document_rules();
        let near = vec![
            edge("document:d1", "parent", "folder:f1"),
            edge("folder:f1", "editor", "user:bob"),
        ];
        let far = vec![
            edge("document:d1", "parent", "folder:f1"),
            edge("folder:f1", "parent", "folder:f2"),
            edge("folder:f2", "editor", "user:bob"),
        ];
        assert_eq!(compare(&near, &far, &rules), Ordering::Less);
    }

    #[test]
    fn test_compare_ties_when_no_rule_discriminates() {
        let rules = document_rules();
        let a = vec![edge("document:d1", "owner", "user:alice")];
        let b = vec![edge("document:d1", "owner", "user:alice")];
        assert_eq!(compare(&a, &b, &rules), Ordering::Equal);

        // With no rules at all, everything ties.
        assert_eq!(
            compare(
                &a,
                &[edge("document:d1", "banned", "user:alice")],
                &[]
            ),
            Ordering::Equal
        );
    }

    #[test]
    fn test_effective_paths_selects_owner_over_member() {
        let rules = document_rules();
        let owner = vec![edge("document:d1", "owner", "user:alice")];
        let via_member = vec![
            edge("document:d1", "parent", "folder:f1"),
            edge("folder:f1", "member", "user:alice"),
        ];

        let reduced = effective_paths(vec![via_member, owner.clone()], &rules);
        assert_eq!(reduced, vec![owner]);
    }

    #[test]
    fn test_effective_paths_keeps_equally_best() {
        let rules = document_rules();
        let a = vec![edge("document:d1", "owner", "user:alice")];
        let b = vec![edge("document:d1", "owner", "group:admins")];
        let reduced = effective_paths(vec![a.clone(), b.clone()], &rules);
        assert_eq!(reduced, vec![a, b]);
    }

    #[test]
    fn test_effective_paths_empty_and_no_rules() {
        assert!(effective_paths(vec![], &document_rules()).is_empty());

        // Without rules the whole set survives.
        let paths = vec![
            vec![edge("document:d1", "owner", "user:alice")],
            vec![edge("document:d1", "editor", "user:bob")],
        ];
        assert_eq!(effective_paths(paths.clone(), &[]), paths);
    }

    #[test]
    fn test_reduction_is_idempotent() {
        let rules = document_rules();
        let paths = vec![
            vec![
                edge("document:d1", "parent", "folder:f1"),
                edge("folder:f1", "member", "user:alice"),
            ],
            vec![edge("document:d1", "owner", "user:alice")],
            vec![edge("document:d1", "editor", "user:alice")],
        ];
        let once = effective_paths(paths, &rules);
        let twice = effective_paths(once.clone(), &rules);
        assert_eq!(once, twice);
    }
}
