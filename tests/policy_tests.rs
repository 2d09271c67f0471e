use qna_portal::error::ApiError;
use qna_portal::policy::{AccessRule, Identity, Role, authorize};
use uuid::Uuid;

fn known(role: Role) -> Identity {
    Identity::Known {
        id: Uuid::new_v4(),
        role,
    }
}

fn known_as(id: Uuid, role: Role) -> Identity {
    Identity::Known { id, role }
}

#[test]
fn role_lattice_is_a_total_order() {
    let all = [Role::User, Role::Moderator, Role::Admin];

    // Reflexive: every role satisfies its own threshold.
    for role in all {
        assert!(role.at_least(role));
    }

    assert!(Role::Moderator.at_least(Role::User));
    assert!(Role::Admin.at_least(Role::User));
    assert!(Role::Admin.at_least(Role::Moderator));

    assert!(!Role::User.at_least(Role::Moderator));
    assert!(!Role::User.at_least(Role::Admin));
    assert!(!Role::Moderator.at_least(Role::Admin));
}

#[test]
fn role_levels_are_stable() {
    assert_eq!(Role::User.level(), 1);
    assert_eq!(Role::Moderator.level(), 2);
    assert_eq!(Role::Admin.level(), 3);
}

#[test]
fn public_rule_admits_everyone() {
    assert!(authorize(&Identity::Anonymous, AccessRule::Public, None).is_ok());
    assert!(authorize(&known(Role::User), AccessRule::Public, None).is_ok());
    assert!(authorize(&known(Role::Admin), AccessRule::Public, None).is_ok());
}

#[test]
fn anonymous_on_any_non_public_rule_is_an_authentication_failure() {
    let owner = Uuid::new_v4();
    let rules = [
        AccessRule::RequireRole(Role::User),
        AccessRule::RequireOwnerOrRole(Role::Admin),
        AccessRule::RequireOwnerAndRole(Role::Admin),
    ];
    for rule in rules {
        let err = authorize(&Identity::Anonymous, rule, Some(owner)).unwrap_err();
        // 401-class, not 403-class: the caller is unknown, not known-and-denied.
        assert!(matches!(err, ApiError::Authentication(_)), "{err:?}");
    }
}

#[test]
fn require_role_compares_against_the_threshold() {
    assert!(authorize(&known(Role::User), AccessRule::RequireRole(Role::User), None).is_ok());
    assert!(authorize(&known(Role::Admin), AccessRule::RequireRole(Role::User), None).is_ok());

    let err = authorize(
        &known(Role::Moderator),
        AccessRule::RequireRole(Role::Admin),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, ApiError::Authorization(_)));
    assert!(err.to_string().starts_with("insufficient rights"));
}

#[test]
fn owner_or_role_admits_either_leg() {
    let owner = Uuid::new_v4();

    // Owner without the role.
    assert!(
        authorize(
            &known_as(owner, Role::User),
            AccessRule::RequireOwnerOrRole(Role::Admin),
            Some(owner),
        )
        .is_ok()
    );

    // Role without ownership.
    assert!(
        authorize(
            &known(Role::Admin),
            AccessRule::RequireOwnerOrRole(Role::Admin),
            Some(owner),
        )
        .is_ok()
    );

    // Neither.
    let err = authorize(
        &known(Role::User),
        AccessRule::RequireOwnerOrRole(Role::Admin),
        Some(owner),
    )
    .unwrap_err();
    assert!(matches!(err, ApiError::Authorization(_)));
}

#[test]
fn owner_and_role_requires_both_legs() {
    let owner = Uuid::new_v4();

    // Both together.
    assert!(
        authorize(
            &known_as(owner, Role::Admin),
            AccessRule::RequireOwnerAndRole(Role::Admin),
            Some(owner),
        )
        .is_ok()
    );

    // Owner alone is denied.
    assert!(
        authorize(
            &known_as(owner, Role::User),
            AccessRule::RequireOwnerAndRole(Role::Admin),
            Some(owner),
        )
        .is_err()
    );

    // Role alone is denied.
    assert!(
        authorize(
            &known(Role::Admin),
            AccessRule::RequireOwnerAndRole(Role::Admin),
            Some(owner),
        )
        .is_err()
    );
}

#[test]
fn missing_owner_information_denies_the_ownership_leg() {
    // A rule that needs ownership can never pass it when the resource has
    // no known owner; only the role leg can admit.
    let err = authorize(
        &known(Role::User),
        AccessRule::RequireOwnerOrRole(Role::Admin),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, ApiError::Authorization(_)));

    assert!(
        authorize(
            &known(Role::Admin),
            AccessRule::RequireOwnerOrRole(Role::Admin),
            None,
        )
        .is_ok()
    );
}
