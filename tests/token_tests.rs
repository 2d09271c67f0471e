use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use qna_portal::config::TOKEN_LIFETIME;
use qna_portal::token::{AuthError, Claims, TokenCodec, bearer_token};
use uuid::Uuid;

const SECRET: &str = "unit-test-secret";

fn codec() -> TokenCodec {
    TokenCodec::new(SECRET, TOKEN_LIFETIME)
}

#[test]
fn issue_then_validate_round_trips_the_subject() {
    let codec = codec();
    let user_id = Uuid::new_v4();

    let token = codec.issue(user_id).expect("signing");
    let claims = codec.validate(&token).expect("validation");

    assert_eq!(claims.sub, user_id);
    assert_eq!(claims.exp, claims.iat + TOKEN_LIFETIME.as_secs() as usize);
}

#[test]
fn garbage_is_malformed() {
    let codec = codec();
    assert_eq!(codec.validate("not-a-token"), Err(AuthError::Malformed));
    assert_eq!(codec.validate(""), Err(AuthError::Malformed));
    assert_eq!(
        codec.validate("aaaa.bbbb.cccc"),
        Err(AuthError::Malformed)
    );
}

#[test]
fn wrong_secret_is_bad_signature_not_malformed() {
    let signer = TokenCodec::new("some-other-secret", TOKEN_LIFETIME);
    let token = signer.issue(Uuid::new_v4()).expect("signing");

    let result = codec().validate(&token);
    assert_eq!(result, Err(AuthError::BadSignature));
}

#[test]
fn expired_token_reports_expired() {
    // Zero lifetime: exp == iat == now, already past.
    let short = TokenCodec::new(SECRET, Duration::ZERO);
    let token = short.issue(Uuid::new_v4()).expect("signing");

    assert_eq!(codec().validate(&token), Err(AuthError::Expired));
}

#[test]
fn expiry_dominates_signature_validity() {
    // Expired and signed with the wrong key: the caller is told about the
    // expiry, not the signature.
    let foreign = TokenCodec::new("some-other-secret", Duration::ZERO);
    let token = foreign.issue(Uuid::new_v4()).expect("signing");

    assert_eq!(codec().validate(&token), Err(AuthError::Expired));
}

#[test]
fn unpinned_algorithm_is_rejected() {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: Uuid::new_v4(),
        iat: now,
        exp: now + 3600,
    };
    // Same secret, different algorithm from the pinned HS256.
    let token = encode(
        &Header::new(Algorithm::HS384),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("signing");

    assert_eq!(codec().validate(&token), Err(AuthError::BadSignature));
}

#[test]
fn bearer_token_strips_exactly_the_bearer_scheme() {
    assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
    assert_eq!(bearer_token("bearer abc"), None);
    assert_eq!(bearer_token("Basic dXNlcjpwdw=="), None);
    assert_eq!(bearer_token("Bearer"), None);
    assert_eq!(bearer_token(""), None);
    // The scheme prefix must include the space; nothing is trimmed beyond it.
    assert_eq!(bearer_token("Bearer  padded"), Some(" padded"));
}
