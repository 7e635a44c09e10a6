use proptest::prelude::*;

use telecare_auth::encoding::base64_encode;
use telecare_auth::{AuthError, Claims, Role};

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Patient), Just(Role::Doctor), Just(Role::Admin)]
}

fn arb_claims() -> impl Strategy<Value = Claims> {
    ("[a-f0-9]{24}", "[a-z]{1,12}@[a-z]{1,8}\\.com", arb_role(), any::<i64>()).prop_map(
        |(user_id, email, role, exp)| Claims {
            user_id,
            email,
            role,
            exp,
        },
    )
}

fn token_for(claims: &Claims) -> String {
    let header = base64_encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = base64_encode(&serde_json::to_vec(claims).unwrap());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

// --- Expiry ---

proptest! {
    #[test]
    fn expired_exactly_when_exp_not_after_now(exp in any::<i64>(), now in any::<i64>()) {
        let claims = Claims {
            user_id: "u".into(),
            email: "e@x.com".into(),
            role: Role::Patient,
            exp,
        };
        prop_assert_eq!(claims.is_expired_at(now), exp <= now);
    }

    #[test]
    fn decode_unexpired_never_accepts_stale_tokens(claims in arb_claims(), skew in 0i64..10_000) {
        let token = token_for(&claims);
        let now = claims.exp.saturating_add(skew);
        let result = Claims::decode_unexpired(&token, now);
        prop_assert_eq!(result, Err(AuthError::Expired { exp: claims.exp }));
    }
}

// --- Decoding ---

proptest! {
    #[test]
    fn decode_recovers_payload(claims in arb_claims()) {
        let token = token_for(&claims);
        prop_assert_eq!(Claims::decode(&token).unwrap(), claims);
    }

    #[test]
    fn decode_never_panics_on_garbage(input in ".{0,200}") {
        // Any outcome is fine as long as it is a value, not a panic.
        let _ = Claims::decode(&input);
    }

    #[test]
    fn dotless_input_is_malformed(input in "[A-Za-z0-9_-]{0,64}") {
        prop_assert!(matches!(
            Claims::decode(&input),
            Err(AuthError::MalformedToken(_))
        ));
    }
}
