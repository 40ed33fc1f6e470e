// Token expiry policy

use chrono::{DateTime, Utc};

use super::types::OAuthToken;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A token is expired strictly after its `expires_at`.
/// A token expiring exactly at `now` is still valid.
pub fn is_expired(token: &OAuthToken, now: i64) -> bool {
    now > token.expires_at
}

/// Expiry check against the wall clock, with diagnostics when `debug` is set
pub fn check_expired(token: &OAuthToken, debug: bool) -> bool {
    let now = now_millis();
    let expired = is_expired(token, now);

    if debug {
        tracing::debug!(
            now = %format_millis(now),
            expires_at = %format_millis(token.expires_at),
            expired,
            "Token expiry check"
        );
    }

    expired
}

/// Render epoch milliseconds as `<ms> (<rfc3339>)`
pub(crate) fn format_millis(ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => format!("{} ({})", ms, dt.to_rfc3339()),
        None => ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn token_expiring_at(expires_at: i64) -> OAuthToken {
        OAuthToken {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
            scopes: vec![],
            subscription_type: None,
            rate_limit_tier: None,
        }
    }

    #[test]
    fn test_boundary_is_valid() {
        let token = token_expiring_at(1_000);
        assert!(!is_expired(&token, 999));
        assert!(!is_expired(&token, 1_000));
        assert!(is_expired(&token, 1_001));
    }

    #[test]
    fn test_check_expired_uses_wall_clock() {
        let past = token_expiring_at(now_millis() - 60_000);
        assert!(check_expired(&past, true));

        let future = token_expiring_at(now_millis() + 3_600_000);
        assert!(!check_expired(&future, false));
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "0 (1970-01-01T00:00:00+00:00)");
        assert_eq!(format_millis(i64::MAX), i64::MAX.to_string());
    }

    proptest! {
        #[test]
        fn prop_strict_inequality(expires_at in i64::MIN / 2..i64::MAX / 2) {
            let token = token_expiring_at(expires_at);
            prop_assert!(!is_expired(&token, expires_at));
            prop_assert!(is_expired(&token, expires_at + 1));
        }
    }
}
