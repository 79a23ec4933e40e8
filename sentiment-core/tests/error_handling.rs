use sentiment_core::{
    CallOutcome, ConfigError, CoreError, DatabaseError, ErrorExt, ErrorReporter, FailureKind,
    LlmError, RedditApiError,
};
use std::time::Duration;

#[test]
fn test_error_codes() {
    let cases = [
        (CoreError::RedditApi(RedditApiError::InvalidToken), "REDDIT_API"),
        (CoreError::Database(DatabaseError::DatabaseLocked), "STORAGE"),
        (
            CoreError::Llm(LlmError::AuthenticationFailed {
                provider: "openai".to_string(),
            }),
            "LLM",
        ),
        (
            CoreError::Config(ConfigError::ValidationFailed {
                reason: "concurrency must be positive".to_string(),
            }),
            "CONFIG",
        ),
        (
            CoreError::FeedUnavailable {
                attempts: 3,
                reason: "503".to_string(),
            },
            "FEED_UNAVAILABLE",
        ),
    ];
    for (error, code) in cases {
        assert_eq!(error.error_code(), code);
    }

    assert_eq!(RedditApiError::InvalidToken.error_code(), "REDDIT_TOKEN_REJECTED");
    assert_eq!(DatabaseError::DatabaseLocked.error_code(), "DB_LOCKED");
}

#[test]
fn test_failure_kinds() {
    let cases = [
        (
            CoreError::FeedUnavailable {
                attempts: 3,
                reason: "timeout".to_string(),
            },
            FailureKind::FeedUnavailable,
        ),
        (
            CoreError::RedditApi(RedditApiError::ServerError { status_code: 502 }),
            FailureKind::FeedUnavailable,
        ),
        (
            CoreError::ClassificationFailed {
                attempts: 3,
                reason: "503".to_string(),
            },
            FailureKind::ClassificationFailed,
        ),
        (
            CoreError::ClassifierUnavailable {
                reason: "circuit breaker open for classify".to_string(),
            },
            FailureKind::ClassifierUnavailable,
        ),
        (
            CoreError::Config(ConfigError::ValidationFailed {
                reason: "bad".to_string(),
            }),
            FailureKind::ConfigurationInvalid,
        ),
        (
            CoreError::Database(DatabaseError::TransactionFailed {
                reason: "disk full".to_string(),
            }),
            FailureKind::StorageFailure,
        ),
        (
            CoreError::RateLimited {
                message: "slow down".to_string(),
                retry_after: None,
            },
            FailureKind::RateLimited,
        ),
        (
            CoreError::Internal {
                message: "?".to_string(),
            },
            FailureKind::Other,
        ),
    ];

    for (error, kind) in cases {
        assert_eq!(error.failure_kind(), kind, "{error}");
    }
}

#[test]
fn test_retryable_errors() {
    assert!(CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 }).is_retryable());
    assert!(CoreError::RedditApi(RedditApiError::InvalidResponse {
        details: "unexpected EOF".to_string(),
    })
    .is_retryable());
    assert!(CoreError::Database(DatabaseError::DatabaseLocked).is_retryable());

    assert!(!CoreError::Config(ConfigError::MissingEnvironmentVariable {
        var_name: "OPENAI_API_KEY".to_string(),
    })
    .is_retryable());
    assert!(!CoreError::Llm(LlmError::AuthenticationFailed {
        provider: "anthropic".to_string(),
    })
    .is_retryable());
    assert!(!CoreError::ClassificationFailed {
        attempts: 3,
        reason: "overloaded".to_string(),
    }
    .is_retryable());
}

#[test]
fn test_retry_after_only_for_cooldowns() {
    let reddit = CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert_eq!(reddit.retry_after(), Some(Duration::from_secs(60)));

    let llm = CoreError::Llm(LlmError::RateLimitExceeded {
        provider: "openai".to_string(),
        retry_after: 12,
    });
    assert_eq!(llm.retry_after(), Some(Duration::from_secs(12)));

    let unspecified = CoreError::RateLimited {
        message: "x-ratelimit-remaining: 0".to_string(),
        retry_after: None,
    };
    assert_eq!(unspecified.retry_after(), Some(Duration::from_secs(60)));

    let server = CoreError::RedditApi(RedditApiError::ServerError { status_code: 503 });
    assert_eq!(server.retry_after(), None);
}

#[test]
fn test_call_outcome_agrees_with_is_retryable() {
    let errors = vec![
        CoreError::RedditApi(RedditApiError::ServerError { status_code: 500 }),
        CoreError::RedditApi(RedditApiError::SubredditNotFound {
            subreddit: "nope".to_string(),
        }),
        CoreError::Llm(LlmError::ContentFiltered {
            reason: "content_filter".to_string(),
        }),
        CoreError::Llm(LlmError::RequestTimeout {
            provider: "anthropic".to_string(),
        }),
    ];

    for error in errors {
        let retryable = error.is_retryable();
        let outcome: CallOutcome<()> = Err(error).into();
        assert_eq!(retryable, !matches!(outcome, CallOutcome::Permanent(_)));
    }
}

#[test]
fn test_user_friendly_messages() {
    let token = CoreError::RedditApi(RedditApiError::InvalidToken);
    assert!(token.user_friendly_message().contains("access token was rejected"));

    let missing = CoreError::Config(ConfigError::MissingEnvironmentVariable {
        var_name: "REDDIT_CLIENT_ID".to_string(),
    });
    assert!(missing.user_friendly_message().contains("REDDIT_CLIENT_ID"));

    let classification = CoreError::ClassificationFailed {
        attempts: 3,
        reason: "timeout".to_string(),
    };
    assert!(classification.user_friendly_message().contains("3 attempts"));

    let not_found = CoreError::RedditApi(RedditApiError::SubredditNotFound {
        subreddit: "rustlang".to_string(),
    });
    assert!(not_found.user_friendly_message().contains("r/rustlang"));
}

#[test]
fn test_error_reporter_toggles() {
    let error = CoreError::Database(DatabaseError::DatabaseLocked);

    ErrorReporter::new().report_error(&error);
    ErrorReporter::default().report_warning(&error);
    ErrorReporter::new()
        .with_error_reporting(false)
        .with_warning_reporting(false)
        .report_error(&error);
}
