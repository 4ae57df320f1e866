use super::*;

fn table(ids: &[&str]) -> NodeTable {
    let mut table = NodeTable::default();
    for (i, id) in ids.iter().enumerate() {
        assert!(table.insert(NodeId::new(*id), NodeIndex(i)));
    }
    table
}

#[test]
fn test_equality_across_kinds() {
    for id in ["a", "patrol", ""] {
        let tree = TreeRef::new(id);
        let raw = RawRef::new(id);
        let node = NodeId::new(id);
        assert_eq!(tree, node);
        assert_eq!(raw, node);
        assert_eq!(node, tree);
        assert!(tree == raw);
        assert!(raw == tree);
    }
    assert!(TreeRef::new("a") != RawRef::new("b"));
    assert_eq!(TreeRef::empty(), TreeRef::new(""));
}

#[test]
fn test_equality_ignores_resolution() {
    let table = table(&["a"]);
    let mut resolved = TreeRef::new("a");
    resolved.resolve(&table);
    assert!(resolved.is_resolved());
    assert_eq!(resolved, TreeRef::new("a"));
}

#[test]
fn test_resolve_is_idempotent() {
    let table = table(&["a", "b"]);
    let mut reference = TreeRef::new("b");
    let first = reference.resolve(&table);
    assert_eq!(first, Some(NodeIndex(1)));
    let second = reference.resolve(&table);
    assert_eq!(first, second);

    // A cached handle is not replaced by a later lookup in a different table.
    let other = self::table(&["x", "y", "b"]);
    assert_eq!(reference.resolve(&other), first);
}

#[test]
fn test_unresolved() {
    let table = table(&["a"]);
    let mut missing = RawRef::new("nope");
    assert_eq!(missing.resolve(&table), None);
    assert!(missing.has_id());
    assert!(!missing.is_resolved());
}

#[test]
fn test_empty_never_resolves() {
    let mut table = table(&["a"]);
    table.insert(NodeId::empty(), NodeIndex(7));
    let mut empty = TreeRef::empty();
    assert_eq!(empty.resolve(&table), None);
    assert!(!empty.has_id());
    assert!(!empty.is_resolved());
}

#[test]
fn test_lookup_or_self() {
    let table = table(&["a"]);
    let unresolved = RawRef::new("a");
    let resolved = table.lookup_or_self(&unresolved);
    assert_eq!(resolved.handle(), Some(NodeIndex(0)));
    assert!(!unresolved.is_resolved());

    let missing = TreeRef::new("zzz");
    assert!(!table.lookup_or_self(&missing).is_resolved());
}

#[test]
fn test_conversions_keep_handle() {
    let table = table(&["a"]);
    let mut tree = TreeRef::new("a");
    tree.resolve(&table);
    let raw = tree.to_raw();
    assert!(!raw.is_structural());
    assert_eq!(raw.handle(), tree.handle());
    assert!(raw.to_tree().is_structural());
}

#[test]
fn test_ordering_by_id() {
    let mut refs = vec![TreeRef::new("c"), TreeRef::new("a"), TreeRef::new("b")];
    refs.sort();
    let ids: Vec<_> = refs.iter().map(|r| r.id().as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[test]
fn test_persisted_form_is_identifier() -> anyhow::Result<()> {
    let table = table(&["target"]);
    let mut reference = TreeRef::new("target");
    reference.resolve(&table);
    let text = serde_yaml::to_string(&reference)?;
    assert!(text.contains("target"));
    assert!(!text.contains('@'));
    let loaded: RawRef = serde_yaml::from_str(&text)?;
    assert_eq!(loaded, reference);
    assert!(!loaded.is_resolved());
    Ok(())
}
