//! Static checks over generated files

use kiln_core::{IssueSeverity, TestIssue, TestReport};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Path of the frontend document inside an artifact
pub const FRONTEND_PATH: &str = "index.html";

/// Hosts that mark an image as a stand-in
pub const PLACEHOLDER_HOSTS: [&str; 3] = ["via.placeholder.com", "placehold.co", "placeholder.com"];

/// Checks generated files and scores them
pub trait Validator: Send + Sync {
    fn validate(&self, files: &BTreeMap<String, String>) -> TestReport;
}

struct Patterns {
    doctype: Regex,
    html_tag: Regex,
    lang_attr: Regex,
    viewport: Regex,
    title: Regex,
    img_tag: Regex,
    alt_attr: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        doctype: Regex::new(r"(?i)^\s*<!doctype\s+html").unwrap(),
        html_tag: Regex::new(r"(?i)<html\b[^>]*>").unwrap(),
        lang_attr: Regex::new(r#"(?i)\blang\s*=\s*["']?[a-z]"#).unwrap(),
        viewport: Regex::new(r#"(?i)<meta[^>]+name\s*=\s*["']viewport["']"#).unwrap(),
        title: Regex::new(r"(?is)<title>\s*(.*?)\s*</title>").unwrap(),
        img_tag: Regex::new(r"(?i)<img\b[^>]*>").unwrap(),
        alt_attr: Regex::new(r#"(?i)\balt\s*=\s*["'][^"']+["']"#).unwrap(),
    })
}

/// Rule-based HTML checks
///
/// Deductions per issue follow [`IssueSeverity::deduction`]; a report passes
/// at 70 or above.
#[derive(Debug, Clone, Default)]
pub struct BasicValidator;

impl BasicValidator {
    pub fn new() -> Self {
        Self
    }

    fn check_html(&self, html: &str) -> Vec<TestIssue> {
        let p = patterns();
        let mut issues = Vec::new();
        let issue = |severity, category: &str, message: &str| {
            TestIssue::new(severity, category, message).in_file(FRONTEND_PATH)
        };

        if !p.doctype.is_match(html) {
            issues.push(issue(IssueSeverity::High, "structure", "Missing <!DOCTYPE html> declaration"));
        }

        match p.html_tag.find(html) {
            Some(tag) if !p.lang_attr.is_match(tag.as_str()) => {
                issues.push(issue(IssueSeverity::Medium, "accessibility", "<html> element has no lang attribute"));
            }
            None => issues.push(issue(IssueSeverity::Critical, "structure", "No <html> element")),
            _ => {}
        }

        if !p.viewport.is_match(html) {
            issues.push(issue(IssueSeverity::High, "responsive", "Missing viewport meta tag"));
        }

        let has_title = p
            .title
            .captures(html)
            .and_then(|c| c.get(1))
            .is_some_and(|t| !t.as_str().is_empty());
        if !has_title {
            issues.push(issue(IssueSeverity::Medium, "seo", "Missing or empty <title>"));
        }

        let missing_alt = p
            .img_tag
            .find_iter(html)
            .filter(|img| !p.alt_attr.is_match(img.as_str()))
            .count();
        if missing_alt > 0 {
            issues.push(issue(
                IssueSeverity::Low,
                "accessibility",
                &format!("{} image(s) without alt text", missing_alt),
            ));
        }

        if PLACEHOLDER_HOSTS.iter().any(|host| html.contains(host)) {
            issues.push(issue(IssueSeverity::Medium, "content", "Placeholder images were not replaced"));
        }

        issues
    }
}

impl Validator for BasicValidator {
    fn validate(&self, files: &BTreeMap<String, String>) -> TestReport {
        let Some(html) = files.get(FRONTEND_PATH).filter(|h| !h.trim().is_empty()) else {
            return TestReport::missing_frontend();
        };

        let mut issues = self.check_html(html);
        for (path, content) in files {
            if path != FRONTEND_PATH && content.trim().is_empty() {
                issues.push(
                    TestIssue::new(IssueSeverity::High, "structure", "Generated file is empty")
                        .in_file(path.clone()),
                );
            }
        }
        TestReport::from_issues(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(html: &str) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        files.insert(FRONTEND_PATH.to_string(), html.to_string());
        files
    }

    const GOOD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta name="viewport" content="width=device-width">
<title>Bakery</title>
</head>
<body><img src="https://cdn.example/hero.png" alt="Fresh bread"></body>
</html>"#;

    #[test]
    fn test_clean_document_scores_full() {
        let report = BasicValidator::new().validate(&files(GOOD));
        assert_eq!(report.score, 100);
        assert!(report.passed);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_bare_document_fails() {
        let report = BasicValidator::new().validate(&files("<html><body><img src=\"https://via.placeholder.com/800\"></body></html>"));
        // doctype 10, lang 5, viewport 10, title 5, alt 2, placeholder 5
        assert_eq!(report.score, 63);
        assert!(!report.passed);
        assert_eq!(report.count(IssueSeverity::High), 2);
    }

    #[test]
    fn test_missing_frontend() {
        let report = BasicValidator::new().validate(&BTreeMap::new());
        assert_eq!(report.score, 0);
        assert!(!report.passed);
        assert_eq!(report.count(IssueSeverity::Critical), 1);
    }

    #[test]
    fn test_empty_backend_file_flagged() {
        let mut files = files(GOOD);
        files.insert("backend/server.py".to_string(), "  ".to_string());
        let report = BasicValidator::new().validate(&files);
        assert_eq!(report.score, 90);
        assert_eq!(report.issues[0].file.as_deref(), Some("backend/server.py"));
    }
}
