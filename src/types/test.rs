use super::*;

struct Fixture {
    registry: TypeRegistry,
    object: TypeHandle,
    agent: TypeHandle,
    soldier: TypeHandle,
    crate_: TypeHandle,
}

fn fixture() -> Fixture {
    let mut registry = TypeRegistry::default();
    let object = registry.define("core", "Object", None);
    let agent = registry.define("game", "Agent", Some(object));
    let soldier = registry.define("game", "Soldier", Some(agent));
    let crate_ = registry.define("game", "Crate", Some(object));
    Fixture {
        registry,
        object,
        agent,
        soldier,
        crate_,
    }
}

#[test]
fn test_set_within_bound() {
    let f = fixture();
    let mut reference = TypeRef::new(Some(f.agent));
    assert!(reference.set(&f.registry, Some(f.agent)));
    assert!(reference.set(&f.registry, Some(f.soldier)));
    assert_eq!(reference.name(), "Soldier");
    assert_eq!(reference.module(), "game");
    assert_eq!(reference.resolve(&f.registry), Some(f.soldier));
}

#[test]
fn test_set_outside_bound_keeps_previous() {
    let f = fixture();
    let mut reference = TypeRef::new(Some(f.agent));
    assert!(reference.set(&f.registry, Some(f.soldier)));

    assert!(!reference.set(&f.registry, Some(f.crate_)));
    assert!(!reference.set(&f.registry, Some(f.object)));
    assert_eq!(reference.name(), "Soldier");
    assert_eq!(reference.resolve(&f.registry), Some(f.soldier));
}

#[test]
fn test_set_none_clears() {
    let f = fixture();
    let mut reference = TypeRef::new(None);
    assert!(reference.set(&f.registry, Some(f.crate_)));
    assert!(!reference.set(&f.registry, None));
    assert!(!reference.is_set());
    assert_eq!(reference.resolve(&f.registry), None);
}

#[test]
fn test_equality_is_symbolic() {
    let f = fixture();
    let a = TypeRef::named("game", "Ghost");
    let b = TypeRef::named("game", "Ghost");
    assert_eq!(a.resolve(&f.registry), None);
    assert_eq!(a, b);
    assert_ne!(a, TypeRef::named("other", "Ghost"));

    let mut c = TypeRef::new(Some(f.object));
    c.set(&f.registry, Some(f.agent));
    assert_eq!(c, TypeRef::named("game", "Agent"));
}

#[test]
fn test_resolve_loads_module_on_demand() {
    let mut registry = TypeRegistry::default();
    registry.declare_module("lazy", false);
    let ty = registry.define("lazy", "Thing", None);
    assert!(!registry.is_loaded("lazy"));
    assert_eq!(registry.find("lazy", "Thing"), None);

    let reference = TypeRef::named("lazy", "Thing");
    assert_eq!(reference.resolve(&registry), Some(ty));
    assert!(registry.is_loaded("lazy"));
}

#[test]
fn test_resolve_through_alias() {
    let mut f = fixture();
    f.registry.alias("legacy::Agent", f.agent);
    let reference = TypeRef::named("legacy", "Agent");
    assert_eq!(reference.resolve(&f.registry), Some(f.agent));
}

#[test]
fn test_failure_is_cached_until_set() {
    let mut f = fixture();
    let mut reference = TypeRef::named("late", "Thing");
    assert_eq!(reference.resolve(&f.registry), None);

    // Defining the type afterwards does not change the cached outcome.
    let ty = f.registry.define("late", "Thing", None);
    assert_eq!(reference.resolve(&f.registry), None);
    assert!(matches!(
        reference.resolve_or_fail(&f.registry),
        Err(TypeError::Unresolved { .. })
    ));

    assert!(reference.set(&f.registry, Some(ty)));
    assert_eq!(reference.resolve_or_fail(&f.registry), Ok(ty));
}

#[test]
fn test_resolved_type_outside_bound_is_absent() {
    let f = fixture();
    let reference = TypeRef::named("game", "Crate").with_base(f.agent);
    assert_eq!(reference.resolve(&f.registry), None);
}

#[test]
fn test_unset_resolve_or_fail() {
    let f = fixture();
    assert_eq!(
        TypeRef::new(None).resolve_or_fail(&f.registry),
        Err(TypeError::Unset)
    );
}

#[test]
fn test_persisted_form() -> anyhow::Result<()> {
    let f = fixture();
    let mut reference = TypeRef::new(Some(f.object));
    reference.set(&f.registry, Some(f.soldier));
    let text = serde_yaml::to_string(&reference)?;
    let loaded: TypeRef = serde_yaml::from_str(&text)?;
    assert_eq!(loaded, reference);
    assert_eq!(loaded.base(), None);
    assert_eq!(loaded.resolve(&f.registry), Some(f.soldier));
    Ok(())
}
