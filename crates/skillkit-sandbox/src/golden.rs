//! Golden test harness: replays recorded cases through the execution engine.

use regex::Regex;
use serde_json::Value;

use skillkit_core::skill::golden::{read_golden_file, Assertion, AssertionKind, GoldenTestCase};
use skillkit_core::skill::{Manifest, TestResult};

use crate::info_log;
use crate::runner::{execute, ExecutionOptions, ExecutionResult};

/// Run every case of the manifest's golden test file with default options.
pub async fn run_tests(manifest: &Manifest) -> TestResult {
    run_tests_with(manifest, &ExecutionOptions::default()).await
}

/// Run every case sequentially, each in a fresh process.
pub async fn run_tests_with(manifest: &Manifest, options: &ExecutionOptions) -> TestResult {
    let path = match manifest.tests_path() {
        Ok(p) => p,
        Err(e) => return TestResult::aborted(format!("golden test file: {}", e)),
    };
    let raw_cases = match read_golden_file(&path) {
        Ok(Some(cases)) => cases,
        Ok(None) => return TestResult::vacuous(),
        Err(e) => return TestResult::aborted(e.to_string()),
    };

    let mut result = TestResult::vacuous();
    for (index, raw) in raw_cases.iter().enumerate() {
        let raw_name = raw.get("name").and_then(Value::as_str).map(str::to_string);
        let case = match GoldenTestCase::from_value(raw) {
            Ok(case) => case,
            Err(e) => {
                result.record_failure(Some(index), raw_name, format!("invalid test case: {}", e));
                continue;
            }
        };

        let outcome = execute(manifest, &case.input, options).await;
        match check_case(&case, &outcome) {
            Ok(()) => result.record_pass(),
            Err(message) => {
                tracing::debug!(skill = %manifest.name, case = %case.label(index), "{}", message);
                result.record_failure(Some(index), case.name.clone(), message);
            }
        }
    }

    info_log!(
        "[{}] golden tests: {} passed, {} failed",
        manifest.name,
        result.passed,
        result.failed
    );
    result
}

fn check_case(case: &GoldenTestCase, outcome: &ExecutionResult) -> Result<(), String> {
    let actual = match outcome {
        ExecutionResult::Success { output } => output,
        ExecutionResult::Failure(f) => {
            let mut message = format!("{}: {}", f.reason, f.message);
            let stderr = f.stderr.trim();
            if !stderr.is_empty() {
                message.push_str(&format!(" (stderr: {})", truncate(stderr, 500)));
            }
            return Err(message);
        }
    };
    match (&case.expected, &case.assertion) {
        (Some(expected), None) => match first_difference(expected, actual, "$") {
            None => Ok(()),
            Some(diff) => Err(format!("output mismatch {}", diff)),
        },
        (None, Some(assertion)) => check_assertion(assertion, actual),
        _ => Err("test case must set exactly one of 'expected' or 'assertion'".to_string()),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// First JSON path where `actual` differs from `expected`, as a diff-style line.
pub fn first_difference(expected: &Value, actual: &Value, path: &str) -> Option<String> {
    match (expected, actual) {
        (Value::Object(e), Value::Object(a)) => {
            for (key, ev) in e {
                let child = format!("{}.{}", path, key);
                match a.get(key) {
                    Some(av) => {
                        if let Some(diff) = first_difference(ev, av, &child) {
                            return Some(diff);
                        }
                    }
                    None => return Some(format!("at {}:\n- {}\n+ <missing>", child, ev)),
                }
            }
            a.iter()
                .find(|(key, _)| !e.contains_key(*key))
                .map(|(key, av)| format!("at {}.{}:\n- <missing>\n+ {}", path, key, av))
        }
        (Value::Array(e), Value::Array(a)) => {
            for (i, (ev, av)) in e.iter().zip(a.iter()).enumerate() {
                if let Some(diff) = first_difference(ev, av, &format!("{}[{}]", path, i)) {
                    return Some(diff);
                }
            }
            if e.len() != a.len() {
                return Some(format!(
                    "at {}: expected {} elements, got {}",
                    path,
                    e.len(),
                    a.len()
                ));
            }
            None
        }
        _ if expected == actual => None,
        _ => Some(format!("at {}:\n- {}\n+ {}", path, expected, actual)),
    }
}

/// Resolve a dotted path (`a.b.0.c`). Numeric segments index arrays. Empty path is the value itself.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn check_assertion(assertion: &Assertion, actual: &Value) -> Result<(), String> {
    let resolved = resolve_path(actual, &assertion.path)
        .ok_or_else(|| format!("path '{}' is undefined in output {}", assertion.path, actual))?;

    match assertion.kind {
        AssertionKind::Contains => {
            let holds = match (resolved, &assertion.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|item| item == needle),
                (other, needle) => other == needle,
            };
            if holds {
                Ok(())
            } else {
                Err(format!(
                    "expected '{}' to contain {}, got {}",
                    assertion.path, assertion.value, resolved
                ))
            }
        }
        AssertionKind::Matches => {
            let pattern = match &assertion.value {
                Value::String(p) => p.clone(),
                other => other.to_string(),
            };
            let re = Regex::new(&pattern)
                .map_err(|e| format!("invalid regex '{}': {}", pattern, e))?;
            let subject = match resolved {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if re.is_match(&subject) {
                Ok(())
            } else {
                Err(format!(
                    "expected '{}' to match /{}/, got {}",
                    assertion.path, pattern, subject
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_difference_reports_path() {
        let expected = json!({"a": {"b": [1, 2, 3]}, "c": "x"});
        assert_eq!(first_difference(&expected, &expected.clone(), "$"), None);

        let actual = json!({"a": {"b": [1, 5, 3]}, "c": "x"});
        let diff = first_difference(&expected, &actual, "$").unwrap();
        assert!(diff.starts_with("at $.a.b[1]:"), "{}", diff);
        assert!(diff.contains("- 2") && diff.contains("+ 5"));

        let extra = json!({"a": {"b": [1, 2, 3]}, "c": "x", "d": true});
        assert!(first_difference(&expected, &extra, "$").unwrap().contains("$.d"));

        let shorter = json!({"a": {"b": [1, 2]}, "c": "x"});
        assert!(first_difference(&expected, &shorter, "$")
            .unwrap()
            .contains("expected 3 elements, got 2"));
    }

    #[test]
    fn test_resolve_path() {
        let v = json!({"items": [{"name": "a"}, {"name": "b"}], "n": 1});
        assert_eq!(resolve_path(&v, "items.1.name"), Some(&json!("b")));
        assert_eq!(resolve_path(&v, ""), Some(&v));
        assert_eq!(resolve_path(&v, "items.7.name"), None);
        assert_eq!(resolve_path(&v, "n.deeper"), None);
    }

    fn assertion(kind: AssertionKind, path: &str, value: Value) -> Assertion {
        Assertion {
            kind,
            path: path.to_string(),
            value,
        }
    }

    #[test]
    fn test_contains_semantics() {
        let out = json!({"msg": "hello world", "tags": ["a", {"k": 1}], "n": 3});
        assert!(check_assertion(&assertion(AssertionKind::Contains, "msg", json!("world")), &out).is_ok());
        assert!(check_assertion(&assertion(AssertionKind::Contains, "tags", json!({"k": 1})), &out).is_ok());
        assert!(check_assertion(&assertion(AssertionKind::Contains, "n", json!(3)), &out).is_ok());
        assert!(check_assertion(&assertion(AssertionKind::Contains, "msg", json!("bye")), &out).is_err());
        assert!(check_assertion(&assertion(AssertionKind::Contains, "missing", json!(1)), &out)
            .unwrap_err()
            .contains("undefined"));
    }

    #[test]
    fn test_matches_semantics() {
        let out = json!({"id": "req-1234", "count": 42});
        assert!(check_assertion(&assertion(AssertionKind::Matches, "id", json!("^req-\\d+$")), &out).is_ok());
        assert!(check_assertion(&assertion(AssertionKind::Matches, "count", json!("^4\\d$")), &out).is_ok());
        assert!(check_assertion(&assertion(AssertionKind::Matches, "id", json!("^x")), &out).is_err());
        assert!(check_assertion(&assertion(AssertionKind::Matches, "id", json!("(")), &out)
            .unwrap_err()
            .contains("invalid regex"));
        // An undefined path never matches, not even a pattern that accepts anything
        assert!(check_assertion(&assertion(AssertionKind::Matches, "missing", json!(".*")), &out)
            .unwrap_err()
            .contains("undefined"));
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use crate::runner::tests::shell_skill;
        use std::fs;

        fn write_cases(dir: &std::path::Path, cases: &str) {
            fs::create_dir_all(dir.join("tests")).unwrap();
            fs::write(dir.join("tests/golden.json"), cases).unwrap();
        }

        #[tokio::test]
        async fn test_no_file_is_vacuously_ok() {
            let tmp = shell_skill("cat\n");
            let m = skillkit_core::skill::parse(tmp.path()).unwrap();
            let result = run_tests(&m).await;
            assert!(result.ok);
            assert_eq!((result.passed, result.failed), (0, 0));
        }

        #[tokio::test]
        async fn test_mixed_cases() {
            let tmp = shell_skill("cat\n");
            write_cases(
                tmp.path(),
                r#"[
                    {"name": "echo", "input": {"msg": "hi"}, "expected": {"msg": "hi"}},
                    {"name": "wrong", "input": {"msg": "hi"}, "expected": {"msg": "bye"}},
                    {"name": "assert", "input": {"msg": "hello"}, "assertion": {"kind": "contains", "path": "msg", "value": "ell"}},
                    {"name": "broken", "input": {}}
                ]"#,
            );
            let m = skillkit_core::skill::parse(tmp.path()).unwrap();
            let result = run_tests(&m).await;
            assert!(!result.ok);
            assert_eq!(result.passed, 2);
            assert_eq!(result.failed, 2);
            assert_eq!(result.failures[0].name.as_deref(), Some("wrong"));
            assert!(result.failures[0].message.contains("$.msg"));
            assert_eq!(result.failures[1].index, Some(3));
            assert!(result.failures[1].message.contains("invalid test case"));
        }

        #[tokio::test]
        async fn test_engine_failure_is_reported() {
            let tmp = shell_skill("echo boom >&2; exit 1\n");
            write_cases(tmp.path(), r#"[{"input": {}, "expected": null}]"#);
            let m = skillkit_core::skill::parse(tmp.path()).unwrap();
            let result = run_tests(&m).await;
            assert_eq!(result.failed, 1);
            let message = &result.failures[0].message;
            assert!(message.starts_with("NonZeroExit"), "{}", message);
            assert!(message.contains("boom"));
        }

        #[tokio::test]
        async fn test_malformed_file_is_one_failure() {
            let tmp = shell_skill("cat\n");
            write_cases(tmp.path(), "{not json");
            let m = skillkit_core::skill::parse(tmp.path()).unwrap();
            let result = run_tests(&m).await;
            assert_eq!(result.failed, 1);
            assert_eq!(result.failures[0].index, None);
            assert!(result.failures[0].message.contains("golden.json"));
        }
    }
}
